//! Centralized default constants for sealpack.
//!
//! **This module is the single source of truth** for shared default values.
//! The codec, its configuration layer and the CLI reference these constants
//! instead of defining their own magic numbers.
//!
//! Organized by domain area. Values that are part of the wire format or the
//! identity derivation are interoperability constants: changing them makes
//! previously written containers or previously derived identities unusable.

// =============================================================================
// CONTAINER LAYOUT
// =============================================================================

/// Plaintext bytes per chunk when the caller does not choose one.
pub const CHUNK_SIZE: usize = 1_000_000;

/// Largest chunk size accepted by encode and by config validation (64 MiB).
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Largest metadata JSON a decoder will allocate for (16 MiB).
pub const MAX_METADATA_LEN: u32 = 16 * 1024 * 1024;

/// Upper bound on recipients per container.
pub const MAX_RECIPIENTS: usize = 1000;

/// Read size used when re-hashing a container during verification (1 MiB).
pub const VERIFY_READ_SIZE: usize = 1024 * 1024;

// =============================================================================
// IDENTITY DERIVATION (Argon2id)
// =============================================================================

/// Argon2id memory cost in KiB (16 MiB).
pub const ARGON2_MEMORY_KIB: u32 = 16 * 1024;

/// Argon2id iterations.
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id lanes.
pub const ARGON2_PARALLELISM: u32 = 1;

/// Namespace prefix for per-user salts and key-wrap domain separation.
pub const KEY_NAMESPACE: &str = "sealpack";

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Env var overriding the chunk size.
pub const ENV_CHUNK_SIZE: &str = "SEALPACK_CHUNK_SIZE";

/// Env var overriding the Argon2id memory cost (KiB).
pub const ENV_KDF_MEMORY_KIB: &str = "SEALPACK_KDF_MEMORY_KIB";

/// Env var overriding the Argon2id iteration count.
pub const ENV_KDF_ITERATIONS: &str = "SEALPACK_KDF_ITERATIONS";

/// Env var overriding the Argon2id lane count.
pub const ENV_KDF_PARALLELISM: &str = "SEALPACK_KDF_PARALLELISM";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_within_bounds() {
        assert!(CHUNK_SIZE > 0);
        assert!(CHUNK_SIZE <= MAX_CHUNK_SIZE);
    }

    #[test]
    fn test_chunk_size_fits_u32() {
        assert!(MAX_CHUNK_SIZE <= u32::MAX as usize);
    }

    #[test]
    fn test_verify_read_size_nonzero() {
        assert!(VERIFY_READ_SIZE > 0);
    }
}
