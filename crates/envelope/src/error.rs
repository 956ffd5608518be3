use std::io;

use thiserror::Error;

/// Errors raised while sealing or unsealing a stream, or handling key files.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// An underlying reader or writer failed.
    #[error("envelope I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The stream or a key file violated its format.
    #[error("malformed envelope: {0}")]
    Format(&'static str),

    /// The stream ended before its final chunk.
    #[error("sealed stream truncated after chunk {chunks}")]
    Truncated {
        /// Chunks successfully unsealed before the stream ended.
        chunks: u64,
    },

    /// Authentication failed; wrong key or tampered data.
    #[error("decryption failed; wrong secret key or corrupted stream")]
    Decrypt,

    /// The passphrase did not unseal the secret key file.
    #[error("passphrase does not unseal the secret key")]
    Passphrase,

    /// Passphrase hashing failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}
