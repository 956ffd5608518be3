use std::io;

use thiserror::Error;

/// Front-end failures; every variant exits with code 1.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file missing, unparsable, or incomplete.
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// The engine aborted the run.
    #[error(transparent)]
    Engine(#[from] engine::EngineError),

    /// Key loading, generation, or passphrase handling failed.
    #[error(transparent)]
    Envelope(#[from] envelope::EnvelopeError),

    /// The restore filename filter is not a valid regular expression.
    #[error("invalid filename regex: {0}")]
    Filter(#[from] Box<regex::Error>),

    /// Reading the passphrase from the terminal failed.
    #[error("cannot read passphrase: {0}")]
    Passphrase(#[source] io::Error),

    /// The two passphrases typed during key generation differ.
    #[error("passphrases do not match")]
    PassphraseMismatch,

    /// Terminal or stream I/O outside the engine failed.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// `restore` needs `backuppath` to locate the snapshot chain.
    #[error("required configuration key 'backuppath' is missing")]
    MissingBackupPath,
}
