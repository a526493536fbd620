//! Container decoding, inspection and verification.
//!
//! Decoding is two passes over the source:
//!
//! 1. Recompute the checksum over `file_id ‖ metadata_len ‖ metadata ‖ chunks`
//!    and compare it with the stored field. A mismatch stops here.
//! 2. Unwrap the file key for the caller and decrypt chunks in order,
//!    writing each plaintext chunk to the sink.
//!
//! No plaintext reaches the sink before the whole container has verified.

use std::time::Instant;

use sealpack_core::defaults::{MAX_METADATA_LEN, VERIFY_READ_SIZE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::chunk::decrypt_chunk;
use crate::digest::IncrementalDigest;
use crate::error::{CryptoError, CryptoResult};
use crate::format::{
    file_id_string, parse_prefix, ContainerHeader, ContainerMetadata, FILE_ID_SIZE, PREFIX_LEN,
};
use crate::identity::Identity;
use crate::io::{with_cancel, Sink, SinkGuard, Source};
use crate::keys::PublicKey;
use crate::wrap::unwrap_file_key;
use crate::CHECKSUM_SIZE;

/// Header and metadata of a container, read without key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Format version.
    pub version: u8,
    /// Stored checksum.
    pub checksum: [u8; CHECKSUM_SIZE],
    /// File identifier.
    pub file_id: [u8; FILE_ID_SIZE],
    /// Parsed metadata.
    pub metadata: ContainerMetadata,
    /// Total container size in bytes.
    pub container_size: u64,
}

impl ContainerInfo {
    /// Recipient user ids.
    pub fn recipients(&self) -> Vec<&str> {
        self.metadata.recipients()
    }
}

/// Outcome of a successful decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeSummary {
    pub file_id: [u8; FILE_ID_SIZE],
    pub total_chunks: u64,
    /// Plaintext bytes written to the sink.
    pub plaintext_size: u64,
    pub metadata: ContainerMetadata,
}

/// Prefix plus raw metadata JSON.
struct RawHeader {
    header: ContainerHeader,
    metadata_json: Vec<u8>,
}

async fn read_raw_header(
    source: &mut dyn Source,
    cancel: &CancellationToken,
) -> CryptoResult<RawHeader> {
    let size = source.size();
    if size < PREFIX_LEN as u64 {
        return Err(CryptoError::Integrity(format!(
            "container too short: {} bytes",
            size
        )));
    }

    let prefix = with_cancel(cancel, source.read_slice(0, PREFIX_LEN), CryptoError::SourceRead).await?;
    let header = parse_prefix(&prefix)?;

    let available = size - PREFIX_LEN as u64;
    if header.metadata_len > MAX_METADATA_LEN || header.metadata_len as u64 > available {
        return Err(CryptoError::Integrity(format!(
            "metadata length {} out of bounds ({} bytes available, maximum {})",
            header.metadata_len, available, MAX_METADATA_LEN
        )));
    }

    let metadata_json = with_cancel(
        cancel,
        source.read_slice(PREFIX_LEN as u64, header.metadata_len as usize),
        CryptoError::SourceRead,
    )
    .await?;

    Ok(RawHeader {
        header,
        metadata_json,
    })
}

/// Recompute the checksum over the metadata and chunk region.
async fn verify_checksum(
    source: &mut dyn Source,
    raw: &RawHeader,
    cancel: &CancellationToken,
) -> CryptoResult<()> {
    let size = source.size();
    let mut digest = IncrementalDigest::new(&raw.header.file_id, &raw.metadata_json);

    let mut offset = raw.header.chunks_offset();
    while offset < size {
        if cancel.is_cancelled() {
            return Err(CryptoError::Cancelled);
        }
        let len = (size - offset).min(VERIFY_READ_SIZE as u64) as usize;
        let bytes = with_cancel(cancel, source.read_slice(offset, len), CryptoError::SourceRead).await?;
        digest.update(&bytes);
        offset += len as u64;
    }

    if digest.finalize() != raw.header.checksum {
        return Err(CryptoError::Integrity("checksum mismatch".to_string()));
    }
    Ok(())
}

/// Verify the checksum, then parse and validate the metadata against the
/// container's actual layout.
async fn verified_info(
    source: &mut dyn Source,
    cancel: &CancellationToken,
) -> CryptoResult<ContainerInfo> {
    let raw = read_raw_header(source, cancel).await?;
    verify_checksum(source, &raw, cancel).await?;

    let metadata = ContainerMetadata::from_json(&raw.metadata_json).map_err(|e| {
        CryptoError::Integrity(format!("checksum matched but metadata is invalid: {}", e))
    })?;

    let container_size = source.size();
    metadata.validate_layout(container_size - raw.header.chunks_offset())?;

    Ok(ContainerInfo {
        version: raw.header.version,
        checksum: raw.header.checksum,
        file_id: raw.header.file_id,
        metadata,
        container_size,
    })
}

/// Parse the header and metadata without verifying or decrypting.
///
/// Useful to list recipients before asking for a passphrase.
pub async fn read_container_info(source: &mut dyn Source) -> CryptoResult<ContainerInfo> {
    let raw = read_raw_header(source, &CancellationToken::new()).await?;
    let metadata = ContainerMetadata::from_json(&raw.metadata_json)?;

    Ok(ContainerInfo {
        version: raw.header.version,
        checksum: raw.header.checksum,
        file_id: raw.header.file_id,
        metadata,
        container_size: source.size(),
    })
}

/// Check the container checksum and layout without any key material.
#[instrument(skip_all, fields(subsystem = "crypto", component = "container_decode", op = "verify"))]
pub async fn verify_container(
    source: &mut dyn Source,
    cancel: &CancellationToken,
) -> CryptoResult<ContainerInfo> {
    let start = Instant::now();
    let info = verified_info(source, cancel).await?;
    info!(
        file_id = %file_id_string(&info.file_id),
        container_size = info.container_size,
        duration_ms = start.elapsed().as_millis() as u64,
        "Container verified"
    );
    Ok(info)
}

async fn decrypt_into(
    source: &mut dyn Source,
    sink: &mut dyn Sink,
    identity: &Identity,
    user_id: &str,
    sender: Option<&PublicKey>,
    cancel: &CancellationToken,
) -> CryptoResult<DecodeSummary> {
    let info = verified_info(source, cancel).await?;
    let metadata = &info.metadata;
    tracing::Span::current().record("file_id", file_id_string(&info.file_id).as_str());

    let wrap = metadata
        .find_recipient(user_id)
        .ok_or_else(|| CryptoError::NoMatchingRecipient(user_id.to_string()))?;
    let sender_key = sender.unwrap_or(&metadata.owner_pub_key);
    if sender_key != &metadata.owner_pub_key {
        debug!("Using caller-supplied sender key instead of owner_pub_key");
    }
    let file_key = unwrap_file_key(&identity.private, sender_key, user_id, wrap)?;
    debug!(total_chunks = metadata.total_chunks, "File key unwrapped");

    let mut offset = info.container_size - metadata.chunk_region_len();
    let mut written = 0u64;
    for counter in 0..metadata.total_chunks {
        if cancel.is_cancelled() {
            return Err(CryptoError::Cancelled);
        }

        let len = metadata.chunk_ciphertext_len(counter) as usize;
        let ciphertext =
            with_cancel(cancel, source.read_slice(offset, len), CryptoError::SourceRead).await?;
        let plaintext = decrypt_chunk(&file_key, &metadata.nonce_base, counter, &ciphertext)?;

        with_cancel(cancel, sink.write_sequential(&plaintext), CryptoError::SinkWrite).await?;
        trace!(chunk_index = counter, plaintext_len = plaintext.len(), "Chunk decrypted");

        offset += len as u64;
        written += plaintext.len() as u64;
    }

    if written != metadata.original.size {
        return Err(CryptoError::Integrity(format!(
            "decrypted {} bytes, metadata declares {}",
            written, metadata.original.size
        )));
    }

    with_cancel(cancel, sink.close(), CryptoError::SinkWrite).await?;

    Ok(DecodeSummary {
        file_id: info.file_id,
        total_chunks: metadata.total_chunks,
        plaintext_size: written,
        metadata: info.metadata.clone(),
    })
}

/// Verify a container and stream its plaintext to `sink` as `user_id`.
///
/// `sender` defaults to the container's `owner_pub_key`. Integrity failures
/// surface as [`CryptoError::Integrity`] before any plaintext is written; a
/// wrong identity or sender key as [`CryptoError::Unwrap`].
///
/// The sink is released exactly once: `finish` on success, `abort` on error
/// or cancellation.
#[instrument(
    skip_all,
    fields(
        subsystem = "crypto",
        component = "container_decode",
        op = "decode",
        user_id = %user_id,
        file_id = tracing::field::Empty,
    )
)]
pub async fn decode_container(
    source: &mut dyn Source,
    sink: &mut dyn Sink,
    identity: &Identity,
    user_id: &str,
    sender: Option<&PublicKey>,
    cancel: &CancellationToken,
) -> CryptoResult<DecodeSummary> {
    let start = Instant::now();

    let mut guard = SinkGuard::new(sink);
    let result = decrypt_into(source, guard.sink(), identity, user_id, sender, cancel).await;
    let summary = guard.release(result).await?;

    info!(
        total_chunks = summary.total_chunks,
        plaintext_size = summary.plaintext_size,
        duration_ms = start.elapsed().as_millis() as u64,
        "Container decoded"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::encode::encode_container;
    use crate::format::FileDescriptor;
    use crate::io::{MemorySink, MemorySource};
    use crate::keys::PrivateKey;

    fn identity(seed: u8) -> Identity {
        Identity::from_private(PrivateKey::from_bytes([seed; 32]))
    }

    async fn sealed(plaintext: &[u8], sender: &Identity, to: &[(&str, &Identity)]) -> Vec<u8> {
        let recipients: BTreeMap<String, PublicKey> = to
            .iter()
            .map(|(user_id, id)| (user_id.to_string(), id.public.clone()))
            .collect();
        let mut sink = MemorySink::new();
        encode_container(
            &mut MemorySource::new(plaintext.to_vec()),
            &mut sink,
            sender,
            &recipients,
            FileDescriptor {
                filename: "notes.txt".to_string(),
                mime: "text/plain".to_string(),
                size: plaintext.len() as u64,
            },
            8,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        sink.into_inner()
    }

    #[tokio::test]
    async fn test_decode_roundtrip() {
        let alice = identity(1);
        let bob = identity(2);
        let container = sealed(b"the quick brown fox", &alice, &[("bob", &bob)]).await;

        let mut out = MemorySink::new();
        let summary = decode_container(
            &mut MemorySource::new(container),
            &mut out,
            &bob,
            "bob",
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(out.as_bytes(), b"the quick brown fox");
        assert_eq!(summary.plaintext_size, 19);
        assert_eq!(summary.total_chunks, 3);
        assert_eq!(summary.metadata.original.filename, "notes.txt");
    }

    #[tokio::test]
    async fn test_decode_unknown_recipient() {
        let alice = identity(1);
        let container = sealed(b"data", &alice, &[("alice", &alice)]).await;

        let result = decode_container(
            &mut MemorySource::new(container),
            &mut MemorySink::new(),
            &identity(3),
            "carol",
            None,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CryptoError::NoMatchingRecipient(_))));
    }

    #[tokio::test]
    async fn test_decode_wrong_sender_key() {
        let alice = identity(1);
        let bob = identity(2);
        let container = sealed(b"data", &alice, &[("bob", &bob)]).await;

        let result = decode_container(
            &mut MemorySource::new(container),
            &mut MemorySink::new(),
            &bob,
            "bob",
            Some(&identity(9).public),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CryptoError::Unwrap)));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_writes_no_plaintext() {
        let alice = identity(1);
        let mut container = sealed(b"sixteen bytes!!!", &alice, &[("alice", &alice)]).await;
        let last = container.len() - 1;
        container[last] ^= 0x01;

        let mut out = MemorySink::new();
        let result = decode_container(
            &mut MemorySource::new(container),
            &mut out,
            &alice,
            "alice",
            None,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(CryptoError::Integrity(_))));
        assert!(out.as_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_len_out_of_bounds() {
        let alice = identity(1);
        let mut container = sealed(b"data", &alice, &[("alice", &alice)]).await;
        container[53..57].copy_from_slice(&u32::MAX.to_le_bytes());

        let result = verify_container(&mut MemorySource::new(container), &CancellationToken::new()).await;
        assert!(matches!(result, Err(CryptoError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_truncated_container() {
        let result = verify_container(
            &mut MemorySource::new(b"SEAL\x01".to_vec()),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CryptoError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_read_info_lists_recipients() {
        let alice = identity(1);
        let bob = identity(2);
        let container = sealed(b"data", &alice, &[("alice", &alice), ("bob", &bob)]).await;

        let info = read_container_info(&mut MemorySource::new(container)).await.unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.recipients(), vec!["alice", "bob"]);
        assert_eq!(info.metadata.owner_pub_key, alice.public);
        assert!(info.metadata.can_decrypt("bob"));
    }

    #[tokio::test]
    async fn test_verify_container_ok() {
        let alice = identity(1);
        let container = sealed(b"verify me", &alice, &[("alice", &alice)]).await;
        let len = container.len() as u64;

        let info = verify_container(&mut MemorySource::new(container), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(info.container_size, len);
        assert_eq!(info.metadata.total_chunks, 2);
    }
}
