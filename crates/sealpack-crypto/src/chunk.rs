//! Per-chunk ChaCha20-Poly1305 encryption/decryption.
//!
//! Nonce layout (12 bytes):
//! ```text
//! [4 bytes: per-container nonce base][8 bytes: chunk counter, little-endian]
//! ```
//!
//! Encrypted chunk format: `[N bytes: ciphertext][16 bytes: Poly1305 tag]`.
//! The nonce is never stored with the chunk; it is rebuilt from the
//! metadata's `nonce_base` and the chunk's position in the stream.
//!
//! A `(nonce_base, counter)` pair must never repeat under one file key.
//! Counters restart at zero per container, which is safe only because every
//! container gets a fresh [`FileKey`].

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::FileKey;
use crate::{NONCE_BASE_SIZE, NONCE_SIZE, TAG_SIZE};

/// Build the 12-byte nonce for chunk `counter`.
pub fn chunk_nonce(nonce_base: &[u8; NONCE_BASE_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_BASE_SIZE].copy_from_slice(nonce_base);
    nonce[NONCE_BASE_SIZE..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encrypt one chunk. Returns `ciphertext ‖ tag`.
pub fn encrypt_chunk(
    file_key: &FileKey,
    nonce_base: &[u8; NONCE_BASE_SIZE],
    counter: u64,
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(file_key.as_bytes().into());
    let nonce = chunk_nonce(nonce_base, counter);

    cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("chunk {} encryption failed: {}", counter, e)))
}

/// Decrypt one chunk (`ciphertext ‖ tag`).
///
/// Fails with [`CryptoError::Authentication`] on tag mismatch: wrong key,
/// wrong counter, or corrupted data.
pub fn decrypt_chunk(
    file_key: &FileKey,
    nonce_base: &[u8; NONCE_BASE_SIZE],
    counter: u64,
    encrypted: &[u8],
) -> CryptoResult<Vec<u8>> {
    if encrypted.len() < TAG_SIZE {
        return Err(CryptoError::Authentication(counter));
    }

    let cipher = ChaCha20Poly1305::new(file_key.as_bytes().into());
    let nonce = chunk_nonce(nonce_base, counter);

    cipher
        .decrypt(Nonce::from_slice(&nonce), encrypted)
        .map_err(|_| CryptoError::Authentication(counter))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: [u8; NONCE_BASE_SIZE] = [0xDE, 0xAD, 0xBE, 0xEF];

    #[test]
    fn test_chunk_nonce_layout() {
        let nonce = chunk_nonce(&BASE, 0x0102_0304_0506_0708);
        assert_eq!(&nonce[..4], &BASE);
        assert_eq!(&nonce[4..], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_chunk_nonce_distinct_per_counter() {
        assert_ne!(chunk_nonce(&BASE, 0), chunk_nonce(&BASE, 1));
        assert_ne!(chunk_nonce(&BASE, 1), chunk_nonce(&BASE, 256));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = FileKey::generate();
        let plaintext = b"hello, encrypted world!";

        let encrypted = encrypt_chunk(&key, &BASE, 0, plaintext).unwrap();
        let decrypted = decrypt_chunk(&key, &BASE, 0, &encrypted).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_encrypted_size() {
        let key = FileKey::generate();
        let encrypted = encrypt_chunk(&key, &BASE, 0, &[0u8; 1000]).unwrap();
        assert_eq!(encrypted.len(), 1000 + TAG_SIZE);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let k1 = FileKey::generate();
        let k2 = FileKey::generate();

        let encrypted = encrypt_chunk(&k1, &BASE, 0, b"secret data").unwrap();
        let result = decrypt_chunk(&k2, &BASE, 0, &encrypted);

        assert!(matches!(result, Err(CryptoError::Authentication(0))));
    }

    #[test]
    fn test_decrypt_wrong_counter() {
        let key = FileKey::generate();

        let encrypted = encrypt_chunk(&key, &BASE, 3, b"secret data").unwrap();
        let result = decrypt_chunk(&key, &BASE, 4, &encrypted);

        assert!(matches!(result, Err(CryptoError::Authentication(4))));
    }

    #[test]
    fn test_decrypt_wrong_nonce_base() {
        let key = FileKey::generate();

        let encrypted = encrypt_chunk(&key, &BASE, 0, b"secret data").unwrap();
        let result = decrypt_chunk(&key, &[0, 0, 0, 0], 0, &encrypted);

        assert!(result.is_err());
    }

    #[test]
    fn test_tampered_ciphertext() {
        let key = FileKey::generate();

        let mut encrypted = encrypt_chunk(&key, &BASE, 0, b"secret data").unwrap();
        encrypted[2] ^= 0xFF;

        let result = decrypt_chunk(&key, &BASE, 0, &encrypted);
        assert!(matches!(result, Err(CryptoError::Authentication(0))));
    }

    #[test]
    fn test_decrypt_shorter_than_tag() {
        let key = FileKey::generate();
        let result = decrypt_chunk(&key, &BASE, 5, &[0u8; 8]);
        assert!(matches!(result, Err(CryptoError::Authentication(5))));
    }
}
