//! Sealing writer: plaintext in, encrypted envelope out.

use std::io::{self, Write};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::error::EnvelopeError;
use crate::keys::PublicKey;
use crate::{CHUNK_LEN, MAGIC, VERSION, chunk_nonce, derive_stream_key};

/// [`Write`] adapter that seals everything written to it for `recipient`.
///
/// Bytes are buffered into 64 KiB chunks and sealed as they fill. The
/// stream is only complete once [`SealedWriter::finish`] has written the
/// final chunk; dropping the writer without finishing produces a stream the
/// reader will reject as truncated.
pub struct SealedWriter<W: Write> {
    inner: W,
    cipher: ChaCha20Poly1305,
    buf: Vec<u8>,
    counter: u64,
}

impl<W: Write> SealedWriter<W> {
    /// Generates an ephemeral keypair, writes the stream header, and
    /// returns a writer sealing to `recipient`.
    pub fn new(mut inner: W, recipient: &PublicKey) -> Result<Self, EnvelopeError> {
        let mut eph_bytes = Zeroizing::new([0u8; 32]);
        getrandom::getrandom(eph_bytes.as_mut())
            .map_err(|err| EnvelopeError::KeyDerivation(err.to_string()))?;
        let ephemeral = StaticSecret::from(*eph_bytes);
        let ephemeral_pub = x25519_dalek::PublicKey::from(&ephemeral);

        let shared = ephemeral.diffie_hellman(&recipient.0);
        let key = Zeroizing::new(derive_stream_key(&shared, &ephemeral_pub, &recipient.0));
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));

        inner.write_all(&MAGIC)?;
        inner.write_all(&VERSION.to_le_bytes())?;
        inner.write_all(ephemeral_pub.as_bytes())?;

        Ok(Self {
            inner,
            cipher,
            buf: Vec::with_capacity(CHUNK_LEN),
            counter: 0,
        })
    }

    /// Seals the final chunk, flushes, and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, EnvelopeError> {
        self.seal_chunk(true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn seal_chunk(&mut self, last: bool) -> Result<(), EnvelopeError> {
        let nonce = chunk_nonce(self.counter, last);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), self.buf.as_slice())
            .map_err(|_| EnvelopeError::Decrypt)?;
        self.inner.write_all(&[u8::from(last)])?;
        self.inner
            .write_all(&(ciphertext.len() as u32).to_le_bytes())?;
        self.inner.write_all(&ciphertext)?;
        self.counter += 1;
        self.buf.clear();
        Ok(())
    }
}

impl<W: Write> Write for SealedWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            let room = CHUNK_LEN - self.buf.len();
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buf.len() == CHUNK_LEN {
                self.seal_chunk(false).map_err(io::Error::other)?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // A short chunk marks end of stream, so partial chunks stay
        // buffered until finish(); flush only forwards to the sink.
        self.inner.flush()
    }
}
