//! Wire frame assembly, sealing and opening.
//!
//! Frame layout:
//!
//! ```text
//! +---------+-----------+--------------+------------+----------+------------+--------+
//! | version | epoch     | sequence     | sender id  | nonce    | ciphertext | tag    |
//! | 1 byte  | 4 bytes BE| 8 bytes BE   | 16 bytes   | 12 bytes | variable   | 16 b   |
//! +---------+-----------+--------------+------------+----------+------------+--------+
//! ```
//!
//! The 41-byte header precedes the ciphertext; the first 29 bytes (through
//! the sender id) are the AAD. Each frame is sealed under a per-message key
//! derived from `(master, epoch, sequence)` and scrubbed before this module
//! returns.

use super::content::Content;
use super::padding;
use crate::core::{
    InputError, RoomsError, AAD_SIZE, AEAD_NONCE_SIZE, FRAME_HEADER_SIZE, MIN_FRAME_SIZE,
    PARTICIPANT_ID_SIZE, PROTOCOL_VERSION,
};
use crate::crypto::{aead, random_array, schedule, ParticipantId, SecretBuffer};

/// A parsed frame header plus a borrowed view of the ciphertext.
#[derive(Debug)]
pub struct FrameView<'a> {
    /// Epoch the frame was sealed in.
    pub epoch: u32,
    /// Sender-local sequence number within the epoch.
    pub sequence: u64,
    /// Sender's participant id.
    pub sender_id: ParticipantId,
    /// AEAD nonce.
    pub nonce: [u8; AEAD_NONCE_SIZE],
    /// Ciphertext including the trailing tag.
    pub ciphertext: &'a [u8],
}

/// Build the 29-byte AAD for `(version, epoch, sequence, sender)`.
///
/// Sender and receiver must produce this bit-identically or the open fails.
pub fn construct_aad(epoch: u32, sequence: u64, sender_id: &ParticipantId) -> [u8; AAD_SIZE] {
    let mut aad = [0u8; AAD_SIZE];
    aad[0] = PROTOCOL_VERSION;
    aad[1..5].copy_from_slice(&epoch.to_be_bytes());
    aad[5..13].copy_from_slice(&sequence.to_be_bytes());
    aad[13..29].copy_from_slice(sender_id.as_bytes());
    aad
}

/// Parse and validate a frame header.
///
/// # Errors
/// `FrameTooShort` below the 57-byte minimum; `UnsupportedVersion` on an
/// unknown version byte.
pub fn parse_frame(bytes: &[u8]) -> Result<FrameView<'_>, InputError> {
    if bytes.len() < MIN_FRAME_SIZE {
        return Err(InputError::FrameTooShort {
            expected: MIN_FRAME_SIZE,
            actual: bytes.len(),
        });
    }
    if bytes[0] != PROTOCOL_VERSION {
        return Err(InputError::UnsupportedVersion(bytes[0]));
    }

    let epoch = u32::from_be_bytes(bytes[1..5].try_into().expect("4 bytes"));
    let sequence = u64::from_be_bytes(bytes[5..13].try_into().expect("8 bytes"));
    let sender_bytes: [u8; PARTICIPANT_ID_SIZE] =
        bytes[13..29].try_into().expect("16 bytes");
    let nonce: [u8; AEAD_NONCE_SIZE] = bytes[29..41].try_into().expect("12 bytes");

    Ok(FrameView {
        epoch,
        sequence,
        sender_id: ParticipantId::from_bytes(sender_bytes),
        nonce,
        ciphertext: &bytes[FRAME_HEADER_SIZE..],
    })
}

/// Pad, encrypt and frame one content payload.
///
/// The per-message key exists only for the duration of this call.
pub fn seal_frame(
    master: &SecretBuffer,
    epoch: u32,
    sequence: u64,
    sender_id: &ParticipantId,
    content: &Content,
    high_security: bool,
) -> Result<Vec<u8>, RoomsError> {
    let padded = padding::pad(&content.encode(), high_security)?;
    let nonce: [u8; AEAD_NONCE_SIZE] = random_array().map_err(RoomsError::Crypto)?;
    let aad = construct_aad(epoch, sequence, sender_id);

    let mut key = schedule::per_message_key(master, epoch, sequence)?;
    let ciphertext = aead::seal(&key, &nonce, &aad, &padded);
    key.wipe();
    let ciphertext = ciphertext?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + ciphertext.len());
    frame.extend_from_slice(&aad);
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypt, unpad and decode a parsed frame.
///
/// The caller performs the replay check first; this function re-derives the
/// per-message key, reconstructs the AAD from the parsed header, opens the
/// AEAD and strips padding.
pub fn open_frame(master: &SecretBuffer, view: &FrameView<'_>) -> Result<Content, RoomsError> {
    let aad = construct_aad(view.epoch, view.sequence, &view.sender_id);

    let mut key = schedule::per_message_key(master, view.epoch, view.sequence)?;
    let padded = aead::open(&key, &view.nonce, &aad, view.ciphertext);
    key.wipe();
    let padded = padded?;

    let content_bytes = padding::unpad(&padded)?;
    Ok(Content::decode(&content_bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> SecretBuffer {
        SecretBuffer::from_slice(&[0x22; 32])
    }

    fn sender() -> ParticipantId {
        ParticipantId::from_bytes([0xA0; 16])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let content = Content::Text("an ephemeral message".into());
        let frame = seal_frame(&master(), 1, 1, &sender(), &content, false).unwrap();

        let view = parse_frame(&frame).unwrap();
        assert_eq!(view.epoch, 1);
        assert_eq!(view.sequence, 1);
        assert_eq!(view.sender_id, sender());

        let opened = open_frame(&master(), &view).unwrap();
        assert_eq!(opened, content);
    }

    #[test]
    fn test_frame_sizes_for_hi() {
        // "hi" encodes to 3 content bytes, landing in the 256 bucket with a
        // variance of at most 25.
        let content = Content::Text("hi".into());
        let frame = seal_frame(&master(), 1, 1, &sender(), &content, false).unwrap();
        let view = parse_frame(&frame).unwrap();

        let ct_len = view.ciphertext.len();
        assert!((272..=297).contains(&ct_len), "ciphertext {}", ct_len);
        assert!((313..=338).contains(&frame.len()), "frame {}", frame.len());
    }

    #[test]
    fn test_parse_rejects_short_frame() {
        assert!(matches!(
            parse_frame(&[PROTOCOL_VERSION; 56]),
            Err(InputError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        let mut frame = vec![0u8; MIN_FRAME_SIZE];
        frame[0] = 0x7F;
        assert!(matches!(
            parse_frame(&frame),
            Err(InputError::UnsupportedVersion(0x7F))
        ));
    }

    #[test]
    fn test_tampered_header_fails_open() {
        let content = Content::Text("hi".into());
        let mut frame = seal_frame(&master(), 1, 7, &sender(), &content, false).unwrap();

        // Flip a sequence bit; the AAD no longer matches the tag.
        frame[12] ^= 0x01;
        let view = parse_frame(&frame).unwrap();
        assert!(open_frame(&master(), &view).is_err());
    }

    #[test]
    fn test_wrong_epoch_derives_wrong_key() {
        let content = Content::Text("hi".into());
        let frame = seal_frame(&master(), 1, 1, &sender(), &content, false).unwrap();

        let mut tampered = frame.clone();
        tampered[4] = 0x02; // epoch 1 -> 2, key derivation diverges
        let view = parse_frame(&tampered).unwrap();
        assert!(open_frame(&master(), &view).is_err());
    }

    #[test]
    fn test_aad_layout() {
        let aad = construct_aad(0x01020304, 0x05060708090A0B0C, &sender());
        assert_eq!(aad[0], PROTOCOL_VERSION);
        assert_eq!(&aad[1..5], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&aad[5..13], &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C]);
        assert_eq!(&aad[13..29], sender().as_bytes());
    }
}
