//! # sealpack-crypto
//!
//! Streaming, multi-recipient envelope encryption.
//!
//! A source of any size is encrypted once under a random per-file key. That
//! key is wrapped separately for every recipient, and the result is a single
//! self-describing container with an end-to-end checksum. Neither the
//! plaintext nor the ciphertext is ever held in memory as a whole.
//!
//! ## Cryptographic Primitives
//!
//! - **Identity**: Argon2id(passphrase, user salt) clamped to an X25519 scalar
//! - **Key wrap**: X25519 + HKDF-SHA256 + ChaCha20-Poly1305
//! - **Payload**: ChaCha20-Poly1305 per chunk, nonce = `base (4) ‖ counter (8, LE)`
//! - **Integrity**: SHA-256 over file id, metadata and chunks, patched into the header
//!
//! ## File Format (SEAL v1)
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ Magic: "SEAL" (4 bytes) + version 0x01          │
//! ├─────────────────────────────────────────────────┤
//! │ Checksum: SHA-256 (32 bytes, patched last)      │
//! ├─────────────────────────────────────────────────┤
//! │ File id (16 bytes) + metadata length u32 LE     │
//! ├─────────────────────────────────────────────────┤
//! │ Metadata (JSON: chunking, wrapped keys, owner)  │
//! ├─────────────────────────────────────────────────┤
//! │ Chunks (ChaCha20-Poly1305, tag per chunk)       │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Examples
//!
//! ### Encrypt and Decrypt
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use sealpack_crypto::{
//!     CodecConfig, ContainerCodec, Credentials, FileDescriptor, KdfParams, MemorySink,
//!     MemorySource,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test_runtime(async {
//! let codec = ContainerCodec::new(CodecConfig {
//!     chunk_size: 1024,
//!     kdf: KdfParams { memory_kib: 64, iterations: 1, parallelism: 1 },
//! });
//!
//! let alice = Credentials::new("alice", "alice passphrase");
//! let alice_pub = codec.identity(&alice).await.unwrap().public;
//! let recipients = BTreeMap::from([("alice".to_string(), alice_pub)]);
//!
//! let data = b"Confidential information".to_vec();
//! let mut container = MemorySink::new();
//! codec
//!     .encode(
//!         &mut MemorySource::new(data.clone()),
//!         &mut container,
//!         &alice,
//!         &recipients,
//!         FileDescriptor { filename: "notes.txt".into(), mime: "text/plain".into(), size: data.len() as u64 },
//!         &CancellationToken::new(),
//!     )
//!     .await
//!     .unwrap();
//!
//! let mut plaintext = MemorySink::new();
//! codec
//!     .decode(
//!         &mut MemorySource::new(container.into_inner()),
//!         &mut plaintext,
//!         &alice,
//!         None,
//!         &CancellationToken::new(),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(plaintext.into_inner(), data);
//! # });
//! # fn tokio_test_runtime(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! ### Format Detection
//!
//! ```rust
//! use sealpack_crypto::{detect_format, FileFormat};
//!
//! match detect_format(b"Some data") {
//!     FileFormat::Container => println!("sealpack container"),
//!     FileFormat::Unknown => println!("not a container"),
//! }
//! ```

pub mod chunk;
pub mod codec;
pub mod config;
pub mod decode;
pub mod detect;
pub mod digest;
pub mod encode;
pub mod error;
pub mod format;
pub mod identity;
pub mod io;
pub mod kdf;
pub mod keys;
pub mod wrap;

/// Symmetric and X25519 key size.
pub const KEY_SIZE: usize = 32;

/// AEAD nonce size.
pub const NONCE_SIZE: usize = 12;

/// Random per-container prefix of every chunk nonce.
pub const NONCE_BASE_SIZE: usize = 4;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// SHA-256 checksum size.
pub const CHECKSUM_SIZE: usize = 32;

// Re-export commonly used types
pub use codec::ContainerCodec;
pub use config::{CodecConfig, ConfigError, ConfigResult};
pub use decode::{
    decode_container, read_container_info, verify_container, ContainerInfo, DecodeSummary,
};
pub use detect::{detect_format, is_container, FileFormat};
pub use encode::{encode_container, EncodeSummary};
pub use error::{CryptoError, CryptoResult};
pub use format::{ContainerHeader, ContainerMetadata, FileDescriptor};
pub use identity::{derive_identity, Credentials, Identity};
pub use io::{
    BufferedSink, FileSink, FileSource, MemorySink, MemorySource, Sink, Source, WriterSink,
};
pub use kdf::KdfParams;
pub use keys::{FileKey, PrivateKey, PublicKey};
pub use wrap::{unwrap_file_key, wrap_file_key, RecipientWrap};
