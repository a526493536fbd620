//! Error types for container operations.

use thiserror::Error;

/// Container and cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Invalid magic bytes - not a sealpack container.
    #[error("Invalid magic bytes - not a sealpack container")]
    InvalidMagic,

    /// Unsupported format version.
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Header or metadata parsing failed.
    #[error("Header parsing failed: {0}")]
    HeaderParse(String),

    /// Password hashing failed (bad parameters or primitive failure).
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Wrapped file key did not authenticate - wrong key or tampered wrap.
    #[error("Key unwrap failed - wrong key or tampered data")]
    Unwrap,

    /// Chunk tag did not authenticate - wrong key or tampered chunk.
    #[error("Authentication failed for chunk {0} - data may be tampered")]
    Authentication(u64),

    /// Checksum, length, or layout mismatch.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// No wrapped key for this user in the container.
    #[error("No matching recipient found: {0}")]
    NoMatchingRecipient(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sink does not support random-access patching.
    #[error("Sink does not support patching")]
    PatchUnsupported,

    /// Reading from the source failed.
    #[error("Source read failed: {0}")]
    SourceRead(#[source] std::io::Error),

    /// Writing to the sink failed.
    #[error("Sink write failed: {0}")]
    SinkWrite(#[source] std::io::Error),

    /// The caller aborted the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CryptoError {
    /// True when the operation was aborted by the caller rather than failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CryptoError::Cancelled)
    }
}

/// Result type for container operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
