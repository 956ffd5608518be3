#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `envelope` seals the byte stream of a snapshot file to a recipient's
//! X25519 public key so the producing host never needs to hold a secret.
//! The writer side only requires the public key; the reader side unseals
//! with the secret key, which lives passphrase-protected on the operator's
//! machine.
//!
//! # Wire Format
//!
//! ```text
//! magic "OCBE" | version: u16 LE | ephemeral_pub: [u8; 32]
//! then per chunk: flag: u8 | ciphertext_len: u32 LE | ciphertext
//! ```
//!
//! The stream key is `blake3::derive_key` over the X25519 shared secret of
//! an ephemeral keypair and the recipient key, bound to both public points.
//! Plaintext is sealed in 64 KiB chunks with ChaCha20-Poly1305; the 12-byte
//! nonce is the chunk counter in little-endian followed by three zero bytes
//! and the final-chunk flag. The flag byte travels in the clear but is
//! authenticated through the nonce, so flipping it breaks decryption. A
//! stream that ends without a final chunk is reported as truncated.
//!
//! # Invariants
//!
//! - Every stream ends with exactly one final chunk (possibly empty).
//! - Chunk counters are strictly sequential; reordering or truncation is
//!   detected by decryption failure or the missing final chunk.
//! - Secret material ([`SecretKey`], derived stream keys, passphrases) is
//!   zeroized on drop.

mod error;
mod keys;
mod open;
mod seal;

pub use error::EnvelopeError;
pub use keys::{PublicKey, SecretKey};
pub use open::SealedReader;
pub use seal::SealedWriter;

/// Magic bytes opening every sealed stream.
pub(crate) const MAGIC: [u8; 4] = *b"OCBE";

/// Envelope format version.
pub(crate) const VERSION: u16 = 1;

/// Plaintext chunk length.
pub(crate) const CHUNK_LEN: usize = 64 * 1024;

/// Poly1305 tag length appended to every chunk.
pub(crate) const TAG_LEN: usize = 16;

/// Domain separation string for the stream key derivation.
pub(crate) const KEY_CONTEXT: &str = "oc-backup v1 seal";

/// Derives the per-stream AEAD key from the shared secret and both points.
pub(crate) fn derive_stream_key(
    shared: &x25519_dalek::SharedSecret,
    ephemeral: &x25519_dalek::PublicKey,
    recipient: &x25519_dalek::PublicKey,
) -> [u8; 32] {
    let mut ikm = [0u8; 96];
    ikm[..32].copy_from_slice(shared.as_bytes());
    ikm[32..64].copy_from_slice(ephemeral.as_bytes());
    ikm[64..].copy_from_slice(recipient.as_bytes());
    let key = blake3::derive_key(KEY_CONTEXT, &ikm);
    zeroize::Zeroize::zeroize(&mut ikm);
    key
}

/// Builds the chunk nonce: counter, padding, final flag.
pub(crate) fn chunk_nonce(counter: u64, last: bool) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce[11] = u8::from(last);
    nonce
}
