//! ChaCha20-Poly1305 AEAD (RFC 8439).
//!
//! Every seal in this protocol uses a key that is derived for exactly one
//! operation and scrubbed immediately after, so nonce handling only needs
//! freshness, not a counter discipline.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use super::secret::SecretBuffer;
use crate::core::{CryptoError, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, MASTER_KEY_SIZE};

/// Encrypt `plaintext` under `key`, authenticating `aad`.
///
/// # Returns
/// Ciphertext with the 16-byte Poly1305 tag appended.
///
/// # Errors
/// `DecryptionFailed` is never returned here; a wrong-size key or cipher
/// failure surfaces as `AuthenticationFailed`.
pub fn seal(
    key: &SecretBuffer,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    key.expose(|k| {
        if k.len() != MASTER_KEY_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(k));
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)
    })
}

/// Decrypt `ciphertext` (with trailing tag) under `key`, verifying `aad`.
///
/// # Errors
/// `DecryptionFailed` on a bad tag, truncated input, or wrong-size key.
pub fn open(
    key: &SecretBuffer,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    key.expose(|k| {
        if k.len() != MASTER_KEY_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(k));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretBuffer {
        SecretBuffer::from_slice(&[0x42; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let nonce = [0x01; AEAD_NONCE_SIZE];
        let aad = b"header";
        let plaintext = b"an ephemeral message";

        let ciphertext = seal(&key, &nonce, aad, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + AEAD_TAG_SIZE);

        let opened = open(&key, &nonce, aad, &ciphertext).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_open_wrong_key_fails() {
        let nonce = [0x01; AEAD_NONCE_SIZE];
        let ciphertext = seal(&test_key(), &nonce, b"", b"secret").unwrap();

        let wrong = SecretBuffer::from_slice(&[0x43; 32]);
        assert!(matches!(
            open(&wrong, &nonce, b"", &ciphertext),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_open_wrong_aad_fails() {
        let key = test_key();
        let nonce = [0x01; AEAD_NONCE_SIZE];
        let ciphertext = seal(&key, &nonce, b"aad-one", b"secret").unwrap();

        assert!(open(&key, &nonce, b"aad-two", &ciphertext).is_err());
    }

    #[test]
    fn test_open_corrupted_ciphertext_fails() {
        let key = test_key();
        let nonce = [0x01; AEAD_NONCE_SIZE];
        let mut ciphertext = seal(&key, &nonce, b"", b"secret").unwrap();
        ciphertext[0] ^= 0xFF;

        assert!(open(&key, &nonce, b"", &ciphertext).is_err());
    }

    #[test]
    fn test_open_truncated_input_fails() {
        let key = test_key();
        let nonce = [0x01; AEAD_NONCE_SIZE];
        assert!(open(&key, &nonce, b"", &[0u8; 8]).is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key();
        let nonce = [0x09; AEAD_NONCE_SIZE];
        let ciphertext = seal(&key, &nonce, b"aad", b"").unwrap();
        assert_eq!(ciphertext.len(), AEAD_TAG_SIZE);
        assert_eq!(open(&key, &nonce, b"aad", &ciphertext).unwrap(), b"");
    }
}
