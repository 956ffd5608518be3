//! Unsealing reader: encrypted envelope in, plaintext out.

use std::io::{self, Read};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroizing;

use crate::error::EnvelopeError;
use crate::keys::SecretKey;
use crate::{CHUNK_LEN, MAGIC, TAG_LEN, VERSION, chunk_nonce, derive_stream_key};

/// [`Read`] adapter that unseals a stream produced by
/// [`crate::SealedWriter`].
///
/// Chunks are verified in counter order; a stream that ends before its
/// final chunk, or that continues past it, is an error. Decryption failures
/// surface as [`io::ErrorKind::InvalidData`] so the reader composes with
/// the gzip decoder stacked on top of it.
pub struct SealedReader<R: Read> {
    inner: R,
    cipher: ChaCha20Poly1305,
    chunk: Vec<u8>,
    offset: usize,
    counter: u64,
    saw_final: bool,
}

impl<R: Read> SealedReader<R> {
    /// Parses the stream header and prepares to unseal for `secret`.
    pub fn new(mut inner: R, secret: &SecretKey) -> Result<Self, EnvelopeError> {
        let mut header = [0u8; 4 + 2 + 32];
        inner.read_exact(&mut header)?;
        if header[..4] != MAGIC {
            return Err(EnvelopeError::Format("sealed stream magic mismatch"));
        }
        if u16::from_le_bytes([header[4], header[5]]) != VERSION {
            return Err(EnvelopeError::Format("unsupported envelope version"));
        }
        let mut point = [0u8; 32];
        point.copy_from_slice(&header[6..]);
        let ephemeral_pub = x25519_dalek::PublicKey::from(point);

        let recipient_pub = x25519_dalek::PublicKey::from(&secret.0);
        let shared = secret.0.diffie_hellman(&ephemeral_pub);
        let key = Zeroizing::new(derive_stream_key(&shared, &ephemeral_pub, &recipient_pub));
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));

        Ok(Self {
            inner,
            cipher,
            chunk: Vec::new(),
            offset: 0,
            counter: 0,
            saw_final: false,
        })
    }

    /// Reads and unseals the next chunk into the internal buffer.
    fn refill(&mut self) -> Result<bool, EnvelopeError> {
        if self.saw_final {
            // Trailing garbage after the final chunk means the file was
            // appended to or spliced; refuse rather than silently stop.
            let mut probe = [0u8; 1];
            return match self.inner.read(&mut probe)? {
                0 => Ok(false),
                _ => Err(EnvelopeError::Format("data after final chunk")),
            };
        }

        let mut flag = [0u8; 1];
        match read_exact_or_eof(&mut self.inner, &mut flag)? {
            ReadOutcome::Eof => {
                return Err(EnvelopeError::Truncated {
                    chunks: self.counter,
                });
            }
            ReadOutcome::Full => {}
        }
        let last = match flag[0] {
            0 => false,
            1 => true,
            _ => return Err(EnvelopeError::Format("invalid chunk flag")),
        };

        let mut len_bytes = [0u8; 4];
        self.inner.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len < TAG_LEN || len > CHUNK_LEN + TAG_LEN {
            return Err(EnvelopeError::Format("chunk length out of range"));
        }

        let mut ciphertext = vec![0u8; len];
        self.inner.read_exact(&mut ciphertext)?;

        let nonce = chunk_nonce(self.counter, last);
        self.chunk = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| EnvelopeError::Decrypt)?;
        self.offset = 0;
        self.counter += 1;
        self.saw_final = last;
        Ok(true)
    }
}

impl<R: Read> Read for SealedReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.offset < self.chunk.len() {
                let take = (self.chunk.len() - self.offset).min(out.len());
                out[..take].copy_from_slice(&self.chunk[self.offset..self.offset + take]);
                self.offset += take;
                return Ok(take);
            }
            match self.refill() {
                Ok(true) => {}
                Ok(false) => return Ok(0),
                Err(EnvelopeError::Io(err)) => return Err(err),
                Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err.to_string())),
            }
        }
    }
}

enum ReadOutcome {
    Full,
    Eof,
}

/// Distinguishes clean EOF from a short read at a chunk boundary.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome, EnvelopeError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 if filled == 0 => return Ok(ReadOutcome::Eof),
            0 => return Err(EnvelopeError::Format("chunk header cut short")),
            n => filled += n,
        }
    }
    Ok(ReadOutcome::Full)
}
