//! Streaming container encoder.
//!
//! Reads the source one chunk at a time, encrypts each chunk under a fresh
//! file key, feeds the ciphertext to the running checksum, and appends it to
//! the sink immediately. Memory use is one chunk, except when the sink cannot
//! patch and the encoder falls back to [`BufferedSink`].
//!
//! Once every chunk is written the sink is closed and the checksum is patched
//! into bytes `5..37` of the header that was written zeroed.

use std::collections::BTreeMap;
use std::io;
use std::time::Instant;

use rand::RngCore;
use sealpack_core::defaults::{MAX_CHUNK_SIZE, MAX_METADATA_LEN, MAX_RECIPIENTS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::chunk::encrypt_chunk;
use crate::digest::IncrementalDigest;
use crate::error::{CryptoError, CryptoResult};
use crate::format::{
    file_id_string, generate_file_id, serialize_header, total_chunks, ContainerMetadata,
    FileDescriptor, CHECKSUM_OFFSET, FILE_ID_SIZE,
};
use crate::identity::Identity;
use crate::io::{with_cancel, BufferedSink, Sink, SinkGuard, Source};
use crate::keys::{FileKey, PublicKey};
use crate::wrap::{wrap_file_key, RecipientWrap};
use crate::{CHECKSUM_SIZE, NONCE_BASE_SIZE};

/// Outcome of a successful encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSummary {
    /// Random file identifier written at bytes `37..53`.
    pub file_id: [u8; FILE_ID_SIZE],
    /// Number of chunks written.
    pub total_chunks: u64,
    /// Plaintext bytes consumed from the source.
    pub plaintext_size: u64,
    /// Container bytes written to the sink.
    pub container_size: u64,
    /// Checksum patched into the header.
    pub checksum: [u8; CHECKSUM_SIZE],
    /// True if the sink could not patch and the container was buffered.
    pub buffered: bool,
}

/// Check recipient ids and count.
fn validate_recipients(recipients: &BTreeMap<String, PublicKey>) -> CryptoResult<()> {
    if recipients.is_empty() {
        return Err(CryptoError::InvalidInput(
            "at least one recipient is required".to_string(),
        ));
    }
    if recipients.len() > MAX_RECIPIENTS {
        return Err(CryptoError::InvalidInput(format!(
            "too many recipients: {} (maximum {})",
            recipients.len(),
            MAX_RECIPIENTS
        )));
    }
    if recipients.keys().any(|user_id| user_id.is_empty()) {
        return Err(CryptoError::InvalidInput(
            "recipient user id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Check chunk size bounds.
pub(crate) fn validate_chunk_size(chunk_size: usize) -> CryptoResult<()> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(CryptoError::InvalidInput(format!(
            "chunk size must be in 1..={}, got {}",
            MAX_CHUNK_SIZE, chunk_size
        )));
    }
    Ok(())
}

/// Everything the streaming phase needs, built before the first write.
struct Prepared {
    file_key: FileKey,
    file_id: [u8; FILE_ID_SIZE],
    nonce_base: [u8; NONCE_BASE_SIZE],
    header: Vec<u8>,
    digest: IncrementalDigest,
    chunk_size: u64,
    total_chunks: u64,
    plaintext_size: u64,
}

fn validate_input(
    recipients: &BTreeMap<String, PublicKey>,
    original: &FileDescriptor,
    source_size: u64,
    chunk_size: usize,
) -> CryptoResult<()> {
    validate_recipients(recipients)?;
    validate_chunk_size(chunk_size)?;
    if original.size != source_size {
        return Err(CryptoError::InvalidInput(format!(
            "descriptor size {} does not match source size {}",
            original.size, source_size
        )));
    }
    Ok(())
}

fn prepare(
    identity: &Identity,
    recipients: &BTreeMap<String, PublicKey>,
    original: FileDescriptor,
    chunk_size: usize,
) -> CryptoResult<Prepared> {
    let file_key = FileKey::generate();
    let file_id = generate_file_id();
    let mut nonce_base = [0u8; NONCE_BASE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_base);

    let encrypted_sym_keys = recipients
        .iter()
        .map(|(user_id, public)| {
            wrap_file_key(&identity.private, public, user_id, &file_key)
                .map(|wrap| (user_id.clone(), wrap))
        })
        .collect::<CryptoResult<BTreeMap<String, RecipientWrap>>>()?;

    let chunk_size = chunk_size as u64;
    let plaintext_size = original.size;
    let total_chunks = total_chunks(plaintext_size, chunk_size);

    let metadata = ContainerMetadata {
        chunk_size,
        total_chunks,
        nonce_base,
        encrypted_sym_keys,
        owner_pub_key: identity.public.clone(),
        original,
    };
    let metadata_json = metadata.to_json()?;
    if metadata_json.len() > MAX_METADATA_LEN as usize {
        return Err(CryptoError::InvalidInput(format!(
            "metadata too large: {} bytes (maximum {})",
            metadata_json.len(),
            MAX_METADATA_LEN
        )));
    }

    let header = serialize_header(&file_id, &metadata_json)?;
    let digest = IncrementalDigest::new(&file_id, &metadata_json);

    Ok(Prepared {
        file_key,
        file_id,
        nonce_base,
        header,
        digest,
        chunk_size,
        total_chunks,
        plaintext_size,
    })
}

/// Write header and chunks, close, then patch the checksum.
async fn stream_container(
    source: &mut dyn Source,
    sink: &mut dyn Sink,
    prepared: Prepared,
    cancel: &CancellationToken,
) -> CryptoResult<([u8; CHECKSUM_SIZE], u64)> {
    let Prepared {
        file_key,
        nonce_base,
        header,
        mut digest,
        chunk_size,
        total_chunks,
        plaintext_size,
        ..
    } = prepared;

    with_cancel(cancel, sink.write_sequential(&header), CryptoError::SinkWrite).await?;
    let mut container_size = header.len() as u64;

    let mut offset = 0u64;
    for counter in 0..total_chunks {
        if cancel.is_cancelled() {
            return Err(CryptoError::Cancelled);
        }

        let len = chunk_size.min(plaintext_size - offset) as usize;
        let plaintext =
            with_cancel(cancel, source.read_slice(offset, len), CryptoError::SourceRead).await?;
        if plaintext.len() != len {
            return Err(CryptoError::SourceRead(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read at offset {}: {} of {} bytes", offset, plaintext.len(), len),
            )));
        }

        let ciphertext = encrypt_chunk(&file_key, &nonce_base, counter, &plaintext)?;
        digest.update(&ciphertext);
        with_cancel(cancel, sink.write_sequential(&ciphertext), CryptoError::SinkWrite).await?;

        trace!(chunk_index = counter, plaintext_len = len, "Chunk written");
        offset += len as u64;
        container_size += ciphertext.len() as u64;
    }

    with_cancel(cancel, sink.close(), CryptoError::SinkWrite).await?;

    let checksum = digest.finalize();
    with_cancel(
        cancel,
        sink.patch_at(CHECKSUM_OFFSET as u64, &checksum),
        |e| match e.kind() {
            io::ErrorKind::Unsupported => CryptoError::PatchUnsupported,
            _ => CryptoError::SinkWrite(e),
        },
    )
    .await?;

    Ok((checksum, container_size))
}

/// Encrypt `source` into a container written to `sink`.
///
/// The file key is wrapped for every entry of `recipients` (user id to public
/// key) using `identity` as the sender. `original.size` must equal the source
/// size.
///
/// If the sink cannot patch, the container is assembled in a
/// [`BufferedSink`] and handed to the sink in one piece on success.
///
/// The sink is released exactly once: `finish` on success, `abort` on error
/// or cancellation. Cancellation yields [`CryptoError::Cancelled`].
#[instrument(
    skip_all,
    fields(
        subsystem = "crypto",
        component = "container_encode",
        op = "encode",
        recipient_count = recipients.len(),
        chunk_size = chunk_size,
        file_id = tracing::field::Empty,
    )
)]
pub async fn encode_container(
    source: &mut dyn Source,
    sink: &mut dyn Sink,
    identity: &Identity,
    recipients: &BTreeMap<String, PublicKey>,
    original: FileDescriptor,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> CryptoResult<EncodeSummary> {
    let start = Instant::now();

    let buffered = !sink.supports_patch();
    let mut fallback: BufferedSink<'_>;
    let target: &mut dyn Sink = if buffered {
        debug!("Sink cannot patch, buffering container until the checksum is known");
        fallback = BufferedSink::new(sink);
        &mut fallback
    } else {
        sink
    };

    // From here on every exit goes through the guard.
    let mut guard = SinkGuard::new(target);
    let prepared = match validate_input(recipients, &original, source.size(), chunk_size)
        .and_then(|()| prepare(identity, recipients, original, chunk_size))
    {
        Ok(prepared) => prepared,
        Err(e) => return guard.release(Err(e)).await,
    };
    let file_id = prepared.file_id;
    let total_chunks = prepared.total_chunks;
    let plaintext_size = prepared.plaintext_size;
    tracing::Span::current().record("file_id", file_id_string(&file_id).as_str());

    let result = stream_container(source, guard.sink(), prepared, cancel).await;
    let (checksum, container_size) = guard.release(result).await?;

    info!(
        total_chunks,
        plaintext_size,
        container_size,
        buffered,
        duration_ms = start.elapsed().as_millis() as u64,
        "Container encoded"
    );

    Ok(EncodeSummary {
        file_id,
        total_chunks,
        plaintext_size,
        container_size,
        checksum,
        buffered,
    })
}
