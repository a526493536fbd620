//! Codec configuration.
//!
//! Loaded from environment variables (optionally via a `.env` file):
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SEALPACK_CHUNK_SIZE` | 1000000 |
//! | `SEALPACK_KDF_MEMORY_KIB` | 16384 |
//! | `SEALPACK_KDF_ITERATIONS` | 3 |
//! | `SEALPACK_KDF_PARALLELISM` | 1 |
//!
//! Changing the KDF parameters changes every derived identity. The defaults
//! are the interoperable profile.

use std::env;
use std::str::FromStr;

use sealpack_core::defaults;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::kdf::KdfParams;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings shared by encode, decode and identity derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Plaintext bytes per chunk.
    pub chunk_size: usize,
    /// Argon2id parameters for identity derivation.
    pub kdf: KdfParams,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            kdf: KdfParams::default(),
        }
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "Unparsable setting, using default");
            default
        }),
    }
}

/// Like `parse_or_default`, but an unparsable value is an error.
fn parse_required<T, F>(lookup: &F, key: &str, default: T) -> ConfigResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::Validation(format!("{} is not a valid number: {:?}", key, raw))
        }),
    }
}

impl CodecConfig {
    /// Build from `SEALPACK_*` environment variables, falling back to defaults.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    ///
    /// An unparsable chunk size falls back to the default. Unparsable KDF
    /// settings are rejected since they change every derived identity.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fallback = Self::default();
        Ok(Self {
            chunk_size: parse_or_default(&lookup, defaults::ENV_CHUNK_SIZE, fallback.chunk_size),
            kdf: KdfParams {
                memory_kib: parse_required(
                    &lookup,
                    defaults::ENV_KDF_MEMORY_KIB,
                    fallback.kdf.memory_kib,
                )?,
                iterations: parse_required(
                    &lookup,
                    defaults::ENV_KDF_ITERATIONS,
                    fallback.kdf.iterations,
                )?,
                parallelism: parse_required(
                    &lookup,
                    defaults::ENV_KDF_PARALLELISM,
                    fallback.kdf.parallelism,
                )?,
            },
        })
    }

    /// Load `.env` if present, read the environment, and validate.
    pub fn load() -> ConfigResult<Self> {
        if dotenvy::dotenv().is_ok() {
            debug!("Loaded .env file");
        }
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.chunk_size == 0 || self.chunk_size > defaults::MAX_CHUNK_SIZE {
            return Err(ConfigError::Validation(format!(
                "chunk_size must be in 1..={}, got {}",
                defaults::MAX_CHUNK_SIZE,
                self.chunk_size
            )));
        }
        if self.kdf.memory_kib == 0 || self.kdf.iterations == 0 || self.kdf.parallelism == 0 {
            return Err(ConfigError::Validation(
                "KDF memory, iterations and parallelism must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CodecConfig::default();
        assert_eq!(config.chunk_size, 1_000_000);
        assert_eq!(config.kdf.memory_kib, 16 * 1024);
        assert_eq!(config.kdf.iterations, 3);
        assert_eq!(config.kdf.parallelism, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CodecConfig::from_lookup(lookup(&[
            ("SEALPACK_CHUNK_SIZE", "65536"),
            ("SEALPACK_KDF_MEMORY_KIB", "1024"),
            ("SEALPACK_KDF_ITERATIONS", " 2 "),
        ]))
        .unwrap();
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.kdf.memory_kib, 1024);
        assert_eq!(config.kdf.iterations, 2);
        assert_eq!(config.kdf.parallelism, 1);
    }

    #[test]
    fn test_from_lookup_unparsable_falls_back() {
        let config =
            CodecConfig::from_lookup(lookup(&[("SEALPACK_CHUNK_SIZE", "lots")])).unwrap();
        assert_eq!(config.chunk_size, defaults::CHUNK_SIZE);
    }

    #[test]
    fn test_from_lookup_rejects_unparsable_kdf() {
        for key in [
            "SEALPACK_KDF_MEMORY_KIB",
            "SEALPACK_KDF_ITERATIONS",
            "SEALPACK_KDF_PARALLELISM",
        ] {
            let result = CodecConfig::from_lookup(lookup(&[(key, "16MiB")]));
            match result {
                Err(ConfigError::Validation(msg)) => assert!(msg.contains(key), "{}", msg),
                other => panic!("expected validation error for {}, got {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let config = CodecConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_chunk() {
        let config = CodecConfig {
            chunk_size: defaults::MAX_CHUNK_SIZE + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_kdf() {
        let mut config = CodecConfig::default();
        config.kdf.iterations = 0;
        assert!(config.validate().is_err());
    }
}
