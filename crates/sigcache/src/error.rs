use std::io;

use thiserror::Error;

/// Errors raised while loading or writing a signature cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An underlying read, write, or rename failed.
    #[error("signature cache I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The file exists but does not parse as a cache.
    #[error("signature cache corrupt: {0}")]
    Corrupt(&'static str),

    /// The file was written by an incompatible format version.
    ///
    /// Callers treat this as "no usable previous cache" and start a fresh
    /// generation rather than failing the run.
    #[error("signature cache format version {version} is not supported")]
    UnsupportedVersion {
        /// Version found in the header.
        version: u16,
    },

    /// The same path was added twice in one run.
    #[error("path recorded twice in one run: {path}")]
    DuplicatePath {
        /// Offending path, lossily decoded for display.
        path: String,
    },

    /// The hostname does not fit the 16-bit length prefix.
    #[error("hostname exceeds 65535 bytes")]
    HostnameTooLong,

    /// A path or signature exceeds the per-entry bound.
    #[error("cache entry exceeds maximum length")]
    EntryTooLong,
}
