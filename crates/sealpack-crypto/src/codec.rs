//! High-level codec that derives identities from credentials.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::CodecConfig;
use crate::decode::{decode_container, DecodeSummary};
use crate::encode::{encode_container, EncodeSummary};
use crate::error::{CryptoError, CryptoResult};
use crate::format::FileDescriptor;
use crate::identity::{derive_identity, Credentials, Identity};
use crate::io::{Sink, Source};
use crate::keys::PublicKey;

/// Container codec bound to one configuration.
///
/// Holds no key material; every call derives what it needs and drops it.
/// Independent calls may run concurrently.
#[derive(Debug, Clone, Default)]
pub struct ContainerCodec {
    config: CodecConfig,
}

impl ContainerCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Derive the identity for `credentials` on the blocking thread pool.
    pub async fn identity(&self, credentials: &Credentials) -> CryptoResult<Identity> {
        let credentials = credentials.clone();
        let params = self.config.kdf.clone();
        debug!(user_id = %credentials.user_id(), "Deriving identity");
        tokio::task::spawn_blocking(move || {
            derive_identity(credentials.passphrase(), credentials.user_id(), &params)
        })
        .await
        .map_err(|e| CryptoError::KeyDerivation(format!("derivation task failed: {}", e)))?
    }

    /// Derive the sender identity and encrypt `source` into `sink`.
    pub async fn encode(
        &self,
        source: &mut dyn Source,
        sink: &mut dyn Sink,
        credentials: &Credentials,
        recipients: &BTreeMap<String, PublicKey>,
        original: FileDescriptor,
        cancel: &CancellationToken,
    ) -> CryptoResult<EncodeSummary> {
        let identity = self.cancellable_identity(credentials, cancel).await;
        let identity = match identity {
            Ok(identity) => identity,
            Err(e) => {
                sink.abort().await;
                return Err(e);
            }
        };
        encode_container(
            source,
            sink,
            &identity,
            recipients,
            original,
            self.config.chunk_size,
            cancel,
        )
        .await
    }

    /// Derive the caller's identity, verify, and decrypt `source` into `sink`.
    pub async fn decode(
        &self,
        source: &mut dyn Source,
        sink: &mut dyn Sink,
        credentials: &Credentials,
        sender: Option<&PublicKey>,
        cancel: &CancellationToken,
    ) -> CryptoResult<DecodeSummary> {
        let identity = match self.cancellable_identity(credentials, cancel).await {
            Ok(identity) => identity,
            Err(e) => {
                sink.abort().await;
                return Err(e);
            }
        };
        decode_container(
            source,
            sink,
            &identity,
            credentials.user_id(),
            sender,
            cancel,
        )
        .await
    }

    async fn cancellable_identity(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> CryptoResult<Identity> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CryptoError::Cancelled),
            identity = self.identity(credentials) => identity,
        }
    }
}
