use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors; all are fatal before any backup or restore I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration file '{path}': {source}")]
    Read {
        /// File that was attempted.
        path: PathBuf,
        /// Underlying failure.
        source: io::Error,
    },

    /// The file is not valid TOML or carries unknown keys.
    #[error("cannot parse configuration file '{path}': {source}")]
    Parse {
        /// File that was attempted.
        path: PathBuf,
        /// Underlying parse failure.
        source: Box<toml::de::Error>,
    },

    /// A key the subcommand requires is absent.
    #[error("required configuration key '{0}' is missing")]
    MissingKey(&'static str),

    /// An exclude pattern is not a valid regular expression.
    #[error("invalid exclude pattern: {source}")]
    InvalidExclude {
        /// Underlying regex failure.
        source: Box<regex::Error>,
    },

    /// `backup.gzlevel` is outside 0-9.
    #[error("gzip level {0} is outside the supported range 0-9")]
    InvalidGzipLevel(u32),

    /// `backuppath` must be absolute.
    #[error("backuppath '{0}' must be an absolute path")]
    RelativeBackupPath(PathBuf),
}
