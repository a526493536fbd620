//! Format detection for container files.
//!
//! Sniffs the magic and version prefix (`SEAL` + `0x01`).

use crate::format::{FORMAT_VERSION, MAGIC_BYTES};

/// Detected file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// A sealpack container this build can read.
    Container,
    /// Anything else, including containers of an unknown version.
    Unknown,
}

/// Detect the format of a file from its leading bytes.
pub fn detect_format(data: &[u8]) -> FileFormat {
    let prefix_len = MAGIC_BYTES.len() + 1;
    if data.len() < prefix_len {
        return FileFormat::Unknown;
    }

    if &data[..MAGIC_BYTES.len()] == MAGIC_BYTES && data[MAGIC_BYTES.len()] == FORMAT_VERSION {
        FileFormat::Container
    } else {
        FileFormat::Unknown
    }
}

/// Check if the bytes start with a sealpack container header.
pub fn is_container(data: &[u8]) -> bool {
    matches!(detect_format(data), FileFormat::Container)
}
