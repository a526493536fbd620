//! # sealpack-core
//!
//! Shared constants and the structured-logging schema for sealpack.
//!
//! This crate has no cryptography in it. It exists so the container codec,
//! the CLI, and any embedding application agree on the same defaults and the
//! same log field names.

pub mod defaults;
pub mod logging;

pub use logging::init_tracing;
