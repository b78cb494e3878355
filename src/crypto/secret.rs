//! Scrubbable secret storage and CSPRNG access.
//!
//! Every secret in this crate lives in a [`SecretBuffer`]: the bytes are
//! wiped with a non-elidable fill (zeroize's compiler fences) on drop and on
//! explicit [`SecretBuffer::wipe`]. Secrets are never held in `String`s or
//! bare `Vec`s, and access is scoped through [`SecretBuffer::expose`].

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::core::CryptoError;

/// Owned secret bytes, wiped on drop.
pub struct SecretBuffer {
    bytes: Vec<u8>,
}

impl SecretBuffer {
    /// Take ownership of secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Copy a slice into a fresh buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Fill a fresh buffer with `len` CSPRNG bytes.
    ///
    /// # Errors
    /// `RandomFailed` if the OS CSPRNG fails; callers must treat this as
    /// unrecoverable.
    pub fn random(len: usize) -> Result<Self, CryptoError> {
        let mut bytes = vec![0u8; len];
        fill_random(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Length of the secret in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty (wiped or zero-length).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Scoped read-only access to the secret bytes.
    ///
    /// The closure result must not contain the bytes themselves; copies made
    /// inside the closure are the caller's responsibility to scrub.
    pub fn expose<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.bytes)
    }

    /// Constant-time comparison against another secret.
    pub fn ct_eq(&self, other: &SecretBuffer) -> bool {
        constant_time_eq(&self.bytes, &other.bytes)
    }

    /// Wipe the secret now. The buffer is empty afterwards.
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
        self.bytes.clear();
    }
}

impl Clone for SecretBuffer {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
        }
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret bytes
        write!(f, "SecretBuffer({} bytes)", self.bytes.len())
    }
}

/// Fill `buf` with CSPRNG output.
///
/// # Errors
/// `RandomFailed` if the OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|_| CryptoError::RandomFailed)
}

/// Generate a fixed-size array of CSPRNG bytes.
pub fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

/// Constant-time equality over byte slices.
///
/// Returns `false` for length mismatches without inspecting contents;
/// otherwise the comparison touches every byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_buffer_wipe() {
        let mut secret = SecretBuffer::from_slice(&[0xAA; 32]);
        assert_eq!(secret.len(), 32);

        secret.wipe();
        assert!(secret.is_empty());
        secret.expose(|bytes| assert!(bytes.is_empty()));
    }

    #[test]
    fn test_secret_buffer_expose_scoped() {
        let secret = SecretBuffer::from_slice(b"top secret");
        let sum: u32 = secret.expose(|bytes| bytes.iter().map(|&b| b as u32).sum());
        assert!(sum > 0);
    }

    #[test]
    fn test_secret_buffer_debug_does_not_leak() {
        let secret = SecretBuffer::from_slice(&[0x42; 16]);
        let rendered = format!("{:?}", secret);
        assert_eq!(rendered, "SecretBuffer(16 bytes)");
        assert!(!rendered.contains("42"));
    }

    #[test]
    fn test_random_buffers_differ() {
        let a = SecretBuffer::random(32).unwrap();
        let b = SecretBuffer::random(32).unwrap();
        assert!(!a.ct_eq(&b));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_random_array_sizes() {
        let nonce: [u8; 12] = random_array().unwrap();
        let key: [u8; 32] = random_array().unwrap();
        assert_eq!(nonce.len(), 12);
        assert_eq!(key.len(), 32);
    }
}
