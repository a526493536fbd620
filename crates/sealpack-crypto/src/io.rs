//! Byte sources and sinks the codec reads from and writes to.
//!
//! A [`Source`] is random-access and of known size. A [`Sink`] is
//! append-only with an optional random-access patch, used once after
//! [`Sink::close`] to overwrite the checksum field.
//!
//! Every sink is released through exactly one of [`Sink::finish`] or
//! [`Sink::abort`]. The codec enforces this with an internal guard.
//!
//! ## Stock implementations
//!
//! | Type | Patch | Notes |
//! |------|-------|-------|
//! | [`MemorySource`] | n/a | owned bytes |
//! | [`FileSource`] | n/a | seek + read_exact on a tokio file |
//! | [`MemorySink`] | yes | growable buffer |
//! | [`FileSink`] | yes | keeps its write handle open across `close` |
//! | [`WriterSink`] | no | any `AsyncWrite`; the encoder buffers for it |
//! | [`BufferedSink`] | yes | defers every byte until `finish` |

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CryptoError, CryptoResult};

/// Random-access byte source of known size.
#[async_trait]
pub trait Source: Send {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Read exactly `len` bytes starting at `offset`.
    async fn read_slice(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

/// Append-only byte sink with optional in-place patching.
#[async_trait]
pub trait Sink: Send {
    /// Append bytes at the current end.
    async fn write_sequential(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// End the append phase. Patching is still allowed afterwards.
    async fn close(&mut self) -> io::Result<()>;

    /// Whether [`Sink::patch_at`] can overwrite bytes already written.
    fn supports_patch(&self) -> bool {
        false
    }

    /// Overwrite `bytes` at `offset` inside the already-written range.
    async fn patch_at(&mut self, _offset: u64, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sink does not support patching",
        ))
    }

    /// Commit and release the sink after a successful run.
    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Discard partial output and release the sink after a failed or
    /// cancelled run.
    async fn abort(&mut self) {}
}

/// Race an I/O future against cancellation.
pub(crate) async fn with_cancel<T, F>(
    cancel: &CancellationToken,
    fut: F,
    map_err: fn(io::Error) -> CryptoError,
) -> CryptoResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CryptoError::Cancelled),
        result = fut => result.map_err(map_err),
    }
}

/// Holds a sink until it is released through exactly one of `finish` or `abort`.
pub(crate) struct SinkGuard<'a> {
    sink: &'a mut dyn Sink,
    released: bool,
}

impl<'a> SinkGuard<'a> {
    pub(crate) fn new(sink: &'a mut dyn Sink) -> Self {
        Self {
            sink,
            released: false,
        }
    }

    pub(crate) fn sink(&mut self) -> &mut dyn Sink {
        &mut *self.sink
    }

    /// Release after success.
    pub(crate) async fn finish(mut self) -> io::Result<()> {
        self.released = true;
        self.sink.finish().await
    }

    /// Release after failure or cancellation.
    pub(crate) async fn abort(mut self) {
        self.released = true;
        self.sink.abort().await;
    }

    /// Release according to `result`, returning it (or the finish error).
    pub(crate) async fn release<T>(self, result: CryptoResult<T>) -> CryptoResult<T> {
        match result {
            Ok(value) => {
                self.finish().await.map_err(CryptoError::SinkWrite)?;
                Ok(value)
            }
            Err(e) => {
                debug!(error = %e, "Aborting sink");
                self.abort().await;
                Err(e)
            }
        }
    }
}

impl Drop for SinkGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            warn!("Sink dropped without finish or abort; the caller's future was dropped mid-operation");
        }
    }
}

fn patch_range_error(offset: u64, len: usize, written: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "patch range {}..{} outside written range 0..{}",
            offset,
            offset + len as u64,
            written
        ),
    )
}

// =============================================================================
// SOURCES
// =============================================================================

/// Source over an owned byte buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    /// Wrap an in-memory buffer.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl Source for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_slice(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("read {}+{} past end {}", start, len, self.data.len()),
                )
            })?;
        Ok(self.data[start..end].to_vec())
    }
}

/// Source over a file on disk. The handle closes when the source is dropped.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileSource {
    /// Open `path` for reading and record its size.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();
        debug!(path = %path.display(), size, "Opened file source");
        Ok(Self { path, file, size })
    }

    /// Path this source reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Source for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_slice(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

// =============================================================================
// SINKS
// =============================================================================

/// Patchable in-memory sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    data: Vec<u8>,
    closed: bool,
}

impl MemorySink {
    /// Empty, patchable sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write_sequential(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::other("write after close"));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn supports_patch(&self) -> bool {
        true
    }

    async fn patch_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        patch_vec(&mut self.data, offset, bytes)
    }

    async fn abort(&mut self) {
        self.data.clear();
    }
}

fn patch_vec(data: &mut [u8], offset: u64, bytes: &[u8]) -> io::Result<()> {
    let written = data.len() as u64;
    let start = usize::try_from(offset)
        .ok()
        .filter(|start| start.saturating_add(bytes.len()) <= data.len())
        .ok_or_else(|| patch_range_error(offset, bytes.len(), written))?;
    data[start..start + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Sink writing to a file on disk.
///
/// The write handle stays open after [`Sink::close`] so the checksum patch
/// overwrites the file in place. [`Sink::abort`] removes the partial file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    written: u64,
}

impl FileSink {
    /// Create (or truncate) `path`.
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), "Created file sink");
        Ok(Self {
            path,
            file: Some(file),
            written: 0,
        })
    }

    /// Path this sink writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn handle(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("file sink already released"))
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write_sequential(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.handle()?.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        let file = self.handle()?;
        file.flush().await?;
        file.sync_data().await
    }

    fn supports_patch(&self) -> bool {
        true
    }

    async fn patch_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        if offset.saturating_add(bytes.len() as u64) > self.written {
            return Err(patch_range_error(offset, bytes.len(), self.written));
        }
        let file = self.handle()?;
        file.flush().await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_data().await
    }

    async fn finish(&mut self) -> io::Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush().await?;
        file.sync_all().await?;
        debug!(path = %self.path.display(), size = self.written, "File sink finished");
        Ok(())
    }

    async fn abort(&mut self) {
        drop(self.file.take());
        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove partial output");
            }
        }
    }
}

/// Append-only sink over any [`AsyncWrite`]. Cannot patch.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    /// Wrap an append-only writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Sink for WriterSink<W> {
    async fn write_sequential(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Patchable wrapper that holds every byte until [`Sink::finish`], then
/// writes the buffer to the inner sink in one pass.
///
/// Used when the target sink cannot patch. Memory use is the whole
/// container.
pub struct BufferedSink<'a> {
    inner: &'a mut dyn Sink,
    buffer: Vec<u8>,
}

impl<'a> BufferedSink<'a> {
    /// Buffer everything until `finish`, then write it to `inner` in one pass.
    pub fn new(inner: &'a mut dyn Sink) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    /// Bytes held so far.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl std::fmt::Debug for BufferedSink<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedSink")
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<'a> Sink for BufferedSink<'a> {
    async fn write_sequential(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn supports_patch(&self) -> bool {
        true
    }

    async fn patch_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        patch_vec(&mut self.buffer, offset, bytes)
    }

    async fn finish(&mut self) -> io::Result<()> {
        let buffer = std::mem::take(&mut self.buffer);
        let flushed = async {
            self.inner.write_sequential(&buffer).await?;
            self.inner.close().await
        }
        .await;

        match flushed {
            Ok(()) => self.inner.finish().await,
            Err(e) => {
                self.inner.abort().await;
                Err(e)
            }
        }
    }

    async fn abort(&mut self) {
        self.buffer.clear();
        self.inner.abort().await;
    }
}
