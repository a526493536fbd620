//! SEAL v1 container format.
//!
//! # Byte Layout
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────────────┐
//! │ [0:4)        │ Magic: "SEAL"                                        │
//! │ [4:5)        │ Format version (1)                                   │
//! │ [5:37)       │ SHA-256 checksum (zero until patched)                │
//! │ [37:53)      │ File id (16 bytes, UUID v4 layout)                   │
//! │ [53:57)      │ Metadata length L: u32 LE                            │
//! │ [57:57+L)    │ Metadata (JSON, UTF-8)                               │
//! │ [57+L:..)    │ chunk₀ ‖ chunk₁ ‖ … (ChaCha20-Poly1305 ct + 16B tag) │
//! └──────────────┴──────────────────────────────────────────────────────┘
//! ```
//!
//! # Metadata Structure
//!
//! ```json
//! {
//!   "chunk_size": 1000000,
//!   "total_chunks": 3,
//!   "nonce_base": "<base64, 4 bytes>",
//!   "encrypted_sym_keys": { "alice": "<base64(nonce ‖ ct ‖ tag)>" },
//!   "owner_pub_key": "<base64, 32 bytes>",
//!   "original": { "filename": "report.pdf", "mime": "application/pdf", "size": 2500000 }
//! }
//! ```

use std::collections::BTreeMap;

use sealpack_core::defaults;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::PublicKey;
use crate::wrap::RecipientWrap;
use crate::{CHECKSUM_SIZE, NONCE_BASE_SIZE, TAG_SIZE};

/// Magic bytes for the container format.
pub const MAGIC_BYTES: &[u8; 4] = b"SEAL";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the file identifier.
pub const FILE_ID_SIZE: usize = 16;

/// Offset of the first checksum byte.
pub const CHECKSUM_OFFSET: usize = MAGIC_BYTES.len() + 1;

/// Offset of the file id (end of the checksum field).
pub const FILE_ID_OFFSET: usize = CHECKSUM_OFFSET + CHECKSUM_SIZE;

/// Offset of the metadata length field.
pub const METADATA_LEN_OFFSET: usize = FILE_ID_OFFSET + FILE_ID_SIZE;

/// Length of the fixed prefix before the metadata JSON.
pub const PREFIX_LEN: usize = METADATA_LEN_OFFSET + 4;

/// Description of the plaintext the container was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Original file name.
    pub filename: String,
    /// MIME type.
    pub mime: String,
    /// Plaintext size in bytes.
    pub size: u64,
}

/// Container metadata, serialized as JSON between the prefix and the chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Plaintext bytes per chunk (the last chunk may be shorter).
    pub chunk_size: u64,

    /// Number of chunks, `ceil(original.size / chunk_size)`.
    pub total_chunks: u64,

    /// Per-container prefix of every chunk nonce.
    #[serde(with = "base64_array")]
    pub nonce_base: [u8; NONCE_BASE_SIZE],

    /// File key wrapped for each recipient, keyed by user id.
    pub encrypted_sym_keys: BTreeMap<String, RecipientWrap>,

    /// Sender public key; recipients unwrap against it.
    pub owner_pub_key: PublicKey,

    /// Original file descriptor.
    pub original: FileDescriptor,
}

impl ContainerMetadata {
    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> CryptoResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(data: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| CryptoError::HeaderParse(format!("Invalid metadata JSON: {}", e)))
    }

    /// Recipient user ids, sorted.
    pub fn recipients(&self) -> Vec<&str> {
        self.encrypted_sym_keys.keys().map(String::as_str).collect()
    }

    /// Whether `user_id` has a wrapped key in this container.
    pub fn can_decrypt(&self, user_id: &str) -> bool {
        self.encrypted_sym_keys.contains_key(user_id)
    }

    /// Find the wrapped key for `user_id`.
    pub fn find_recipient(&self, user_id: &str) -> Option<&RecipientWrap> {
        self.encrypted_sym_keys.get(user_id)
    }

    /// Ciphertext length of chunk `index` (plaintext slice plus tag).
    pub fn chunk_ciphertext_len(&self, index: u64) -> u64 {
        let start = index * self.chunk_size;
        let plain = self.chunk_size.min(self.original.size.saturating_sub(start));
        plain + TAG_SIZE as u64
    }

    /// Total length of the chunk region implied by this metadata.
    pub fn chunk_region_len(&self) -> u64 {
        self.original.size + self.total_chunks * TAG_SIZE as u64
    }

    /// Check the layout invariants against the actual chunk region length.
    pub fn validate_layout(&self, chunk_region_len: u64) -> CryptoResult<()> {
        if self.chunk_size == 0 {
            return Err(CryptoError::Integrity("chunk_size is zero".to_string()));
        }
        if self.chunk_size > defaults::MAX_CHUNK_SIZE as u64 {
            return Err(CryptoError::Integrity(format!(
                "chunk_size {} exceeds maximum {}",
                self.chunk_size,
                defaults::MAX_CHUNK_SIZE
            )));
        }

        let expected_chunks = total_chunks(self.original.size, self.chunk_size);
        if self.total_chunks != expected_chunks {
            return Err(CryptoError::Integrity(format!(
                "total_chunks {} does not match ceil({} / {}) = {}",
                self.total_chunks, self.original.size, self.chunk_size, expected_chunks
            )));
        }

        let expected_len = self
            .original
            .size
            .checked_add(self.total_chunks.saturating_mul(TAG_SIZE as u64))
            .ok_or_else(|| CryptoError::Integrity("chunk region length overflows".to_string()))?;
        if chunk_region_len != expected_len {
            return Err(CryptoError::Integrity(format!(
                "chunk region is {} bytes, metadata implies {}",
                chunk_region_len, expected_len
            )));
        }

        Ok(())
    }
}

/// `ceil(size / chunk_size)`; zero for an empty source.
pub fn total_chunks(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size)
}

/// Generate a random 16-byte file id with the UUID v4 bit layout.
pub fn generate_file_id() -> [u8; FILE_ID_SIZE] {
    Uuid::new_v4().into_bytes()
}

/// Render a file id in canonical UUID form.
pub fn file_id_string(file_id: &[u8; FILE_ID_SIZE]) -> String {
    Uuid::from_bytes(*file_id).hyphenated().to_string()
}

/// The parsed fixed-size prefix of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Format version.
    pub version: u8,
    /// Stored checksum.
    pub checksum: [u8; CHECKSUM_SIZE],
    /// File identifier.
    pub file_id: [u8; FILE_ID_SIZE],
    /// Length of the metadata JSON.
    pub metadata_len: u32,
}

impl ContainerHeader {
    /// Offset of the first chunk byte.
    pub fn chunks_offset(&self) -> u64 {
        PREFIX_LEN as u64 + self.metadata_len as u64
    }
}

/// Serialize the prefix and metadata with a zeroed checksum field.
pub fn serialize_header(file_id: &[u8; FILE_ID_SIZE], metadata_json: &[u8]) -> CryptoResult<Vec<u8>> {
    let metadata_len = u32::try_from(metadata_json.len()).map_err(|_| {
        CryptoError::InvalidInput(format!(
            "Metadata too large: {} bytes",
            metadata_json.len()
        ))
    })?;

    let mut output = Vec::with_capacity(PREFIX_LEN + metadata_json.len());
    output.extend_from_slice(MAGIC_BYTES);
    output.push(FORMAT_VERSION);
    output.extend_from_slice(&[0u8; CHECKSUM_SIZE]);
    output.extend_from_slice(file_id);
    output.extend_from_slice(&metadata_len.to_le_bytes());
    output.extend_from_slice(metadata_json);

    Ok(output)
}

/// Parse the fixed prefix. Does not read or validate the metadata JSON.
pub fn parse_prefix(data: &[u8]) -> CryptoResult<ContainerHeader> {
    if data.len() < PREFIX_LEN {
        return Err(CryptoError::Integrity(format!(
            "Data too short for container header: {} bytes",
            data.len()
        )));
    }

    if &data[..MAGIC_BYTES.len()] != MAGIC_BYTES {
        return Err(CryptoError::InvalidMagic);
    }

    let version = data[MAGIC_BYTES.len()];
    if version != FORMAT_VERSION {
        return Err(CryptoError::UnsupportedVersion(version));
    }

    let mut checksum = [0u8; CHECKSUM_SIZE];
    checksum.copy_from_slice(&data[CHECKSUM_OFFSET..FILE_ID_OFFSET]);

    let mut file_id = [0u8; FILE_ID_SIZE];
    file_id.copy_from_slice(&data[FILE_ID_OFFSET..METADATA_LEN_OFFSET]);

    let metadata_len = u32::from_le_bytes([
        data[METADATA_LEN_OFFSET],
        data[METADATA_LEN_OFFSET + 1],
        data[METADATA_LEN_OFFSET + 2],
        data[METADATA_LEN_OFFSET + 3],
    ]);

    Ok(ContainerHeader {
        version,
        checksum,
        file_id,
        metadata_len,
    })
}

/// Serde helper for base64-encoded fixed-size byte arrays.
mod base64_array {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|v: Vec<u8>| {
            serde::de::Error::custom(format!("Expected {} bytes, got {}", N, v.len()))
        })
    }
}
