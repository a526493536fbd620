//! Password-derived X25519 identities.
//!
//! An identity is a deterministic function of `(passphrase, user_id)`:
//!
//! 1. Argon2id over the passphrase, salted with `"sealpack:salt:" + user_id`
//! 2. Clamp the 32-byte output to a Curve25519 scalar
//! 3. Public key = scalar × base point
//!
//! Nothing is persisted. Changing the passphrase changes the identity, so
//! identities are recomputed on demand rather than cached.

use sealpack_core::defaults::KEY_NAMESPACE;
use tracing::instrument;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoResult;
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{PrivateKey, PublicKey};
use crate::KEY_SIZE;

/// A derived X25519 keypair.
pub struct Identity {
    /// The clamped private scalar (must be kept secret).
    pub private: PrivateKey,
    /// The public key (shared with senders).
    pub public: PublicKey,
}

impl Identity {
    /// Build an identity from an existing private scalar.
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { public, private }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public", &self.public)
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// A user id plus the passphrase that unlocks its identity.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    user_id: String,
    passphrase: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            passphrase: passphrase.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// Per-user Argon2id salt: `"<namespace>:salt:" + user_id`.
pub fn user_salt(user_id: &str) -> Vec<u8> {
    format!("{}:salt:{}", KEY_NAMESPACE, user_id).into_bytes()
}

/// Clamp 32 bytes to a valid Curve25519 scalar.
///
/// Clears bits 0-2 of byte 0, clears bit 7 and sets bit 6 of byte 31.
pub fn clamp_scalar(mut bytes: [u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    bytes[0] &= 0b1111_1000;
    bytes[31] &= 0b0111_1111;
    bytes[31] |= 0b0100_0000;
    bytes
}

/// Derive the identity for `(passphrase, user_id)`.
///
/// Deterministic and side-effect free. Fails with
/// [`CryptoError::KeyDerivation`](crate::CryptoError::KeyDerivation) if
/// Argon2id rejects the parameters.
#[instrument(skip(passphrase, params), fields(subsystem = "crypto", component = "identity", op = "derive"))]
pub fn derive_identity(
    passphrase: &str,
    user_id: &str,
    params: &KdfParams,
) -> CryptoResult<Identity> {
    let salt = user_salt(user_id);
    let derived = derive_key(passphrase.as_bytes(), &salt, params)?;
    let private = PrivateKey::from_bytes(clamp_scalar(*derived.as_bytes()));
    Ok(Identity::from_private(private))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_clamp_scalar_bits() {
        let clamped = clamp_scalar([0xFFu8; KEY_SIZE]);
        assert_eq!(clamped[0] & 0b0000_0111, 0);
        assert_eq!(clamped[31] & 0b1000_0000, 0);
        assert_eq!(clamped[31] & 0b0100_0000, 0b0100_0000);
        assert_eq!(&clamped[1..31], &[0xFFu8; 30]);

        let clamped = clamp_scalar([0u8; KEY_SIZE]);
        assert_eq!(clamped[31], 0b0100_0000);
    }

    #[test]
    fn test_user_salt_format() {
        assert_eq!(user_salt("alice"), b"sealpack:salt:alice".to_vec());
    }

    #[test]
    fn test_derive_identity_deterministic() {
        let a = derive_identity("hunter2hunter2", "alice", &fast_params()).unwrap();
        let b = derive_identity("hunter2hunter2", "alice", &fast_params()).unwrap();
        assert_eq!(a.public, b.public);
        assert_eq!(a.private.as_bytes(), b.private.as_bytes());
    }

    #[test]
    fn test_derive_identity_depends_on_inputs() {
        let base = derive_identity("hunter2hunter2", "alice", &fast_params()).unwrap();
        let other_user = derive_identity("hunter2hunter2", "bob", &fast_params()).unwrap();
        let other_pass = derive_identity("hunter3hunter3", "alice", &fast_params()).unwrap();
        assert_ne!(base.public, other_user.public);
        assert_ne!(base.public, other_pass.public);
    }

    #[test]
    fn test_derived_private_key_is_clamped() {
        let identity = derive_identity("pass", "carol", &fast_params()).unwrap();
        let scalar = identity.private.as_bytes();
        assert_eq!(scalar[0] & 0b111, 0);
        assert_eq!(scalar[31] & 0b1100_0000, 0b0100_0000);
    }

    #[test]
    fn test_public_matches_private() {
        let identity = derive_identity("pass", "dave", &fast_params()).unwrap();
        assert_eq!(identity.public, identity.private.public_key());
    }

    #[test]
    fn test_bad_params_fail_without_fallback() {
        let params = KdfParams {
            memory_kib: 0,
            iterations: 0,
            parallelism: 0,
        };
        let result = derive_identity("pass", "erin", &params);
        assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let creds = Credentials::new("alice", "super-secret-passphrase");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("super-secret"));
    }
}
