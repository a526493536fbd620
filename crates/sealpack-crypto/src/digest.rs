//! Rolling SHA-256 checksum over the container body.
//!
//! Covers exactly `file_id ‖ metadata_len (u32 LE) ‖ metadata JSON ‖ chunk₀ ‖ … ‖ chunkₙ₋₁`.
//! The magic, version and checksum field are never hashed, which is what
//! lets the checksum be patched into the header after streaming.

use sha2::{Digest, Sha256};

use crate::format::FILE_ID_SIZE;
use crate::CHECKSUM_SIZE;

/// Incremental container checksum.
#[derive(Clone)]
pub struct IncrementalDigest {
    hasher: Sha256,
}

impl IncrementalDigest {
    /// Start a digest seeded with the container prefix that precedes the chunks.
    pub fn new(file_id: &[u8; FILE_ID_SIZE], metadata_json: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file_id);
        hasher.update((metadata_json.len() as u32).to_le_bytes());
        hasher.update(metadata_json);
        Self { hasher }
    }

    /// Feed container bytes that follow the metadata, in stream order.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Finish and return the 32-byte checksum.
    pub fn finalize(self) -> [u8; CHECKSUM_SIZE] {
        self.hasher.finalize().into()
    }
}

impl std::fmt::Debug for IncrementalDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalDigest").finish_non_exhaustive()
    }
}
