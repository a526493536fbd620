//! Key material types: X25519 public/private keys and the per-container file key.
//!
//! # Security
//!
//! - Private keys and file keys are zeroized on drop
//! - `Debug` output never contains secret bytes
//! - File keys come from the OS-seeded CSPRNG and are never serialized in plaintext

use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// X25519 public key (32 bytes).
///
/// Serialized as standard base64, which is also the form stored in
/// container metadata as `owner_pub_key`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Create a public key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the public key.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Standard base64 encoding of the key.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Parse a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidInput(format!("Invalid public key base64: {}", e)))?;
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::InvalidInput(format!("Expected 32-byte public key, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }

    pub(crate) fn to_x25519(&self) -> X25519Public {
        X25519Public::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

impl std::str::FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// X25519 private scalar (32 bytes, already clamped) with automatic zeroization.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; KEY_SIZE]);

impl PrivateKey {
    /// Create a private key from raw scalar bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw scalar bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub(crate) fn to_x25519(&self) -> StaticSecret {
        StaticSecret::from(self.0)
    }

    /// Scalar multiplication against the Curve25519 base point.
    pub fn public_key(&self) -> PublicKey {
        let secret = self.to_x25519();
        let public = X25519Public::from(&secret);
        PublicKey(*public.as_bytes())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Random per-container symmetric key. Zeroized on drop.
///
/// Deliberately not `Clone`: one file key belongs to exactly one encode call,
/// since the chunk nonce counter restarts at zero for every container.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct FileKey([u8; KEY_SIZE]);

impl FileKey {
    /// Generate a fresh random file key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
