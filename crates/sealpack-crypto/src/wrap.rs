//! Per-recipient file-key wrapping.
//!
//! # Protocol
//!
//! For wrapping (sender side):
//! 1. shared_secret = X25519(sender_private, recipient_public)
//! 2. wrap_key = HKDF-SHA256(salt = "sealpack-wrap-v1", ikm = shared_secret, info = "wrap:" + user_id)
//! 3. Fresh random 12-byte nonce
//! 4. ChaCha20-Poly1305(wrap_key, nonce, file_key)
//!
//! For unwrapping (recipient side) the shared secret is
//! X25519(recipient_private, sender_public), which is the same value.
//!
//! The user id in the HKDF info binds a wrap to its slot in the recipient
//! map, so a wrap copied under another user id does not authenticate.

use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{FileKey, PrivateKey, PublicKey};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// HKDF salt for key-wrap derivation.
const HKDF_SALT_WRAP: &[u8] = b"sealpack-wrap-v1";

/// Raw X25519 output. Passed through HKDF before use.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SharedSecret([u8; 32]);

/// HKDF output used as the wrap AEAD key.
#[derive(Zeroize, ZeroizeOnDrop)]
struct WrapKey([u8; KEY_SIZE]);

/// One recipient's wrapped copy of the file key.
#[derive(Clone, PartialEq, Eq)]
pub struct RecipientWrap {
    /// Random nonce, unique per wrap.
    pub nonce: [u8; NONCE_SIZE],
    /// ChaCha20-Poly1305 ciphertext of the file key, tag appended.
    pub wrapped_key: Vec<u8>,
}

impl RecipientWrap {
    /// Encode as base64(`nonce ‖ ciphertext ‖ tag`), the metadata representation.
    pub fn to_base64(&self) -> String {
        let mut blob = Vec::with_capacity(NONCE_SIZE + self.wrapped_key.len());
        blob.extend_from_slice(&self.nonce);
        blob.extend_from_slice(&self.wrapped_key);
        base64::engine::general_purpose::STANDARD.encode(blob)
    }

    /// Decode the metadata representation.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::HeaderParse(format!("Invalid wrapped key base64: {}", e)))?;

        if blob.len() < NONCE_SIZE + KEY_SIZE + TAG_SIZE {
            return Err(CryptoError::HeaderParse(format!(
                "Wrapped key too short: {} bytes (minimum {})",
                blob.len(),
                NONCE_SIZE + KEY_SIZE + TAG_SIZE
            )));
        }

        let (nonce_bytes, wrapped_key) = blob.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self {
            nonce,
            wrapped_key: wrapped_key.to_vec(),
        })
    }
}

impl std::fmt::Debug for RecipientWrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipientWrap")
            .field("nonce", &hex::encode(self.nonce))
            .field("wrapped_key_len", &self.wrapped_key.len())
            .finish()
    }
}

impl Serialize for RecipientWrap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for RecipientWrap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

fn ecdh(our_private: &PrivateKey, their_public: &PublicKey) -> SharedSecret {
    let secret = our_private.to_x25519();
    let shared = secret.diffie_hellman(&their_public.to_x25519());
    SharedSecret(*shared.as_bytes())
}

fn derive_wrap_key(
    our_private: &PrivateKey,
    their_public: &PublicKey,
    user_id: &str,
) -> CryptoResult<WrapKey> {
    let shared = ecdh(our_private, their_public);
    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT_WRAP), &shared.0);
    let info = format!("wrap:{}", user_id);
    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(info.as_bytes(), &mut key)
        .map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand failed: {}", e)))?;
    Ok(WrapKey(key))
}

/// Wrap `file_key` for the recipient `user_id` holding `recipient_public`.
///
/// A fresh random nonce is drawn on every call.
pub fn wrap_file_key(
    own_private: &PrivateKey,
    recipient_public: &PublicKey,
    user_id: &str,
    file_key: &FileKey,
) -> CryptoResult<RecipientWrap> {
    let wrap_key = derive_wrap_key(own_private, recipient_public, user_id)?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new((&wrap_key.0).into());
    let wrapped_key = cipher
        .encrypt(Nonce::from_slice(&nonce), file_key.as_bytes().as_slice())
        .map_err(|e| CryptoError::Encryption(format!("key wrapping failed: {}", e)))?;

    Ok(RecipientWrap { nonce, wrapped_key })
}

/// Recover the file key from `wrap` as recipient `user_id`.
///
/// Fails with [`CryptoError::Unwrap`] when the tag does not verify, which
/// means the wrong identity, the wrong sender key, or tampered data.
pub fn unwrap_file_key(
    own_private: &PrivateKey,
    sender_public: &PublicKey,
    user_id: &str,
    wrap: &RecipientWrap,
) -> CryptoResult<FileKey> {
    let wrap_key = derive_wrap_key(own_private, sender_public, user_id)?;

    let cipher = ChaCha20Poly1305::new((&wrap_key.0).into());
    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(&wrap.nonce), wrap.wrapped_key.as_slice())
        .map_err(|_| CryptoError::Unwrap)?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(CryptoError::Unwrap);
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(FileKey::from_bytes(key_bytes))
}
