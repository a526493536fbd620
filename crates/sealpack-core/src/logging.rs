//! Structured logging schema and subscriber setup for sealpack.
//!
//! The codec and the CLI use these field names for structured logging so
//! log aggregation can query every subsystem the same way.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Operation failed and the caller will see an error |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Operation completions (container written, container decoded) |
//! | DEBUG | Decision points (buffered sink chosen, recipient resolved) |
//! | TRACE | Per-chunk progress |
//!
//! Key material, passphrases and plaintext are never logged.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event. Values: "crypto", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "container_encode", "container_decode", "identity"
pub const COMPONENT: &str = "component";

/// Logical operation name. Examples: "encode", "decode", "verify", "derive"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Container file id (UUID string).
pub const FILE_ID: &str = "file_id";

/// User id the operation acts for.
pub const USER_ID: &str = "user_id";

/// Zero-based chunk index.
pub const CHUNK_INDEX: &str = "chunk_index";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks in a container.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Plaintext bytes per chunk.
pub const CHUNK_SIZE: &str = "chunk_size";

/// Number of recipients a file key was wrapped for.
pub const RECIPIENT_COUNT: &str = "recipient_count";

/// Original plaintext size in bytes.
pub const PLAINTEXT_SIZE: &str = "plaintext_size";

/// Total container size in bytes.
pub const CONTAINER_SIZE: &str = "container_size";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Whether the encoder fell back to a fully buffered sink.
pub const BUFFERED: &str = "buffered";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Initialize the global tracing subscriber.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: `default_filter`)
///
/// Console output goes to stderr so stdout stays free for command output.
/// Returns the file appender guard, which must be held for the process lifetime.
/// Call once per process.
pub fn init_tracing(default_filter: &str) -> Option<WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("sealpack.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            // no ANSI in files unless asked for
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}
