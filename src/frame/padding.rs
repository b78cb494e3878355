//! Padding buckets.
//!
//! Plaintext lengths are quantized to one of seven buckets, then inflated by
//! a random additive variance of up to 10% of the bucket, so ciphertext
//! sizes reveal only a coarse band. Padding bytes are CSPRNG output, never
//! zero fill.

use crate::core::{
    InputError, RoomsError, HIGH_SECURITY_BUCKETS, PADDING_BUCKETS, PAD_LENGTH_PREFIX_SIZE,
};
use crate::crypto::{fill_random, random_array};

/// Pick the smallest bucket whose payload capacity fits `content_len`.
///
/// # Errors
/// `MessageTooLarge` when the content exceeds the largest bucket's capacity.
pub fn select_bucket(content_len: usize, high_security: bool) -> Result<usize, InputError> {
    let buckets: &[usize] = if high_security {
        &HIGH_SECURITY_BUCKETS
    } else {
        &PADDING_BUCKETS
    };
    buckets
        .iter()
        .copied()
        .find(|&b| content_len <= b - PAD_LENGTH_PREFIX_SIZE)
        .ok_or(InputError::MessageTooLarge(content_len))
}

/// Pad `content` to `bucket + variance` bytes.
///
/// Layout: `length(4 BE) || content || random padding`. The variance is
/// uniform over `[0, bucket / 10]`.
pub fn pad(content: &[u8], high_security: bool) -> Result<Vec<u8>, RoomsError> {
    let bucket = select_bucket(content.len(), high_security)?;
    let variance = random_variance(bucket / 10)?;
    let total = bucket + variance;

    let mut padded = vec![0u8; total];
    padded[..PAD_LENGTH_PREFIX_SIZE].copy_from_slice(&(content.len() as u32).to_be_bytes());
    padded[PAD_LENGTH_PREFIX_SIZE..PAD_LENGTH_PREFIX_SIZE + content.len()]
        .copy_from_slice(content);
    fill_random(&mut padded[PAD_LENGTH_PREFIX_SIZE + content.len()..])?;
    Ok(padded)
}

/// Strip padding, returning the original content.
///
/// # Errors
/// `InvalidPadding` when the buffer is shorter than the length prefix or the
/// prefix points past the end.
pub fn unpad(padded: &[u8]) -> Result<Vec<u8>, InputError> {
    if padded.len() < PAD_LENGTH_PREFIX_SIZE {
        return Err(InputError::InvalidPadding);
    }
    let length = u32::from_be_bytes(
        padded[..PAD_LENGTH_PREFIX_SIZE]
            .try_into()
            .expect("prefix is 4 bytes"),
    ) as usize;
    if length > padded.len() - PAD_LENGTH_PREFIX_SIZE {
        return Err(InputError::InvalidPadding);
    }
    Ok(padded[PAD_LENGTH_PREFIX_SIZE..PAD_LENGTH_PREFIX_SIZE + length].to_vec())
}

/// Uniform draw from `[0, max]` inclusive.
fn random_variance(max: usize) -> Result<usize, RoomsError> {
    let raw: [u8; 8] = random_array().map_err(RoomsError::Crypto)?;
    Ok((u64::from_be_bytes(raw) % (max as u64 + 1)) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_selection() {
        assert_eq!(select_bucket(0, false).unwrap(), 256);
        assert_eq!(select_bucket(252, false).unwrap(), 256);
        assert_eq!(select_bucket(253, false).unwrap(), 1_024);
        assert_eq!(select_bucket(1_020, false).unwrap(), 1_024);
        assert_eq!(select_bucket(1_021, false).unwrap(), 8_192);
        assert_eq!(select_bucket(5_242_876, false).unwrap(), 5_242_880);
    }

    #[test]
    fn test_bucket_selection_high_security() {
        // The coarse policy skips the 256, 8k, 256k and 1M buckets.
        assert_eq!(select_bucket(2, true).unwrap(), 1_024);
        assert_eq!(select_bucket(1_021, true).unwrap(), 65_536);
        assert_eq!(select_bucket(65_533, true).unwrap(), 5_242_880);
    }

    #[test]
    fn test_oversize_rejected() {
        assert!(matches!(
            select_bucket(5_242_877, false),
            Err(InputError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_pad_length_window() {
        // "hi" lands in the 256 bucket; variance is at most 25.
        let padded = pad(b"hi", false).unwrap();
        assert!(padded.len() >= 256, "padded to {}", padded.len());
        assert!(padded.len() <= 281, "padded to {}", padded.len());
    }

    #[test]
    fn test_pad_unpad_roundtrip() {
        for content in [&b""[..], b"x", b"hello world", &[0xAB; 300], &[0xCD; 9000]] {
            let padded = pad(content, false).unwrap();
            assert_eq!(unpad(&padded).unwrap(), content);
        }
    }

    #[test]
    fn test_padding_is_not_zero_fill() {
        // 250 bytes of padding being all zero has probability 2^-2000.
        let padded = pad(b"hi", false).unwrap();
        assert!(padded[6..].iter().any(|&b| b != 0));
    }

    #[test]
    fn test_unpad_rejects_bad_prefix() {
        assert!(matches!(unpad(&[0, 0]), Err(InputError::InvalidPadding)));

        // Prefix claims more content than the buffer holds.
        let mut padded = vec![0u8; 64];
        padded[..4].copy_from_slice(&100u32.to_be_bytes());
        assert!(matches!(unpad(&padded), Err(InputError::InvalidPadding)));
    }
}
