use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Structural errors that abort a backup or restore run.
///
/// Per-file problems never surface here; they are logged and counted in
/// the run summary instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem failure outside any single source file.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The previous signature cache exists but cannot be parsed.
    #[error(transparent)]
    Cache(#[from] sigcache::CacheError),

    /// Writing or reading the snapshot failed.
    #[error(transparent)]
    Snapshot(#[from] snapshot::SnapshotError),

    /// The sealed envelope failed.
    #[error(transparent)]
    Envelope(#[from] envelope::EnvelopeError),

    /// The delta codec rejected its input.
    #[error(transparent)]
    Delta(#[from] delta::DeltaError),

    /// The run was cancelled by an interrupt.
    #[error("run cancelled")]
    Cancelled,

    /// `backup.group` does not resolve to a POSIX group.
    #[error("configured group '{0}' does not exist")]
    UnknownGroup(String),

    /// The local hostname could not be determined.
    #[error("cannot determine hostname: {0}")]
    Hostname(String),

    /// The system clock is unusable for generation timestamps.
    #[error("cannot read system clock: {0}")]
    Clock(String),

    /// No snapshot files exist under the backup path.
    #[error("no snapshot files found in '{0}'")]
    NoSnapshots(PathBuf),

    /// The selected generation's increment chain is incomplete.
    ///
    /// Happens when a generation boundary discarded earlier increments or
    /// a file was removed by hand; restoring from a gap would silently
    /// produce a truncated tree, so the whole operation is refused.
    #[error("snapshot chain unrecoverable: {0}")]
    BrokenChain(String),
}
