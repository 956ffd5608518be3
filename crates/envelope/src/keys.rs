//! Recipient key pairs and their on-disk formats.
//!
//! The public key file is a single base64 line so it can be pasted into
//! configuration management. The secret key file is binary and sealed under
//! a passphrase: argon2id stretches the passphrase, and the resulting key
//! seals the raw scalar with ChaCha20-Poly1305. The salt is fresh per file,
//! so the zero nonce is used exactly once per derived key.

use std::fs;
use std::io::Write;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, Zeroizing};

use crate::error::EnvelopeError;

/// Magic bytes opening a sealed secret key file.
const SECRET_MAGIC: [u8; 4] = *b"OCSK";

/// Secret key file format version.
const SECRET_VERSION: u16 = 1;

/// Argon2 salt length stored in the secret key file.
const SALT_LEN: usize = 16;

/// Serialized secret key file length.
const SECRET_FILE_LEN: usize = 4 + 2 + SALT_LEN + 32 + crate::TAG_LEN;

/// Recipient public key; all a producing host ever holds.
#[derive(Clone)]
pub struct PublicKey(pub(crate) x25519_dalek::PublicKey);

impl PublicKey {
    /// Parses a public key file: one base64 line encoding 32 bytes.
    pub fn load(path: &Path) -> Result<Self, EnvelopeError> {
        let text = fs::read_to_string(path)?;
        let decoded = BASE64
            .decode(text.trim())
            .map_err(|_| EnvelopeError::Format("public key is not valid base64"))?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| EnvelopeError::Format("public key must decode to 32 bytes"))?;
        Ok(Self(x25519_dalek::PublicKey::from(bytes)))
    }

    /// Writes the key as a base64 line with a trailing newline.
    pub fn save(&self, path: &Path) -> Result<(), EnvelopeError> {
        let mut file = fs::File::create(path)?;
        writeln!(file, "{}", BASE64.encode(self.0.as_bytes()))?;
        Ok(())
    }

    /// Raw point bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

/// Recipient secret key, held only on the restore side.
pub struct SecretKey(pub(crate) StaticSecret);

impl SecretKey {
    /// Generates a fresh keypair from the system entropy source.
    pub fn generate() -> Result<(Self, PublicKey), EnvelopeError> {
        let mut bytes = Zeroizing::new([0u8; 32]);
        getrandom::getrandom(bytes.as_mut())
            .map_err(|err| EnvelopeError::KeyDerivation(err.to_string()))?;
        let secret = StaticSecret::from(*bytes);
        let public = PublicKey(x25519_dalek::PublicKey::from(&secret));
        Ok((Self(secret), public))
    }

    /// The matching public key.
    #[must_use]
    pub fn public(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Unseals a secret key file with the supplied passphrase.
    pub fn load(path: &Path, passphrase: &[u8]) -> Result<Self, EnvelopeError> {
        let bytes = fs::read(path)?;
        if bytes.len() != SECRET_FILE_LEN {
            return Err(EnvelopeError::Format("secret key file has wrong length"));
        }
        if bytes[..4] != SECRET_MAGIC {
            return Err(EnvelopeError::Format("secret key file magic mismatch"));
        }
        if u16::from_le_bytes([bytes[4], bytes[5]]) != SECRET_VERSION {
            return Err(EnvelopeError::Format("unsupported secret key version"));
        }

        let salt = &bytes[6..6 + SALT_LEN];
        let sealed = &bytes[6 + SALT_LEN..];

        let wrap_key = derive_wrap_key(passphrase, salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(wrap_key.as_ref()));
        let scalar = cipher
            .decrypt(Nonce::from_slice(&[0u8; 12]), sealed)
            .map_err(|_| EnvelopeError::Passphrase)?;
        let mut scalar: [u8; 32] = scalar
            .try_into()
            .map_err(|_| EnvelopeError::Format("sealed scalar has wrong length"))?;
        let secret = StaticSecret::from(scalar);
        scalar.zeroize();
        Ok(Self(secret))
    }

    /// Seals the key under `passphrase` and writes it with mode 0600.
    pub fn save(&self, path: &Path, passphrase: &[u8]) -> Result<(), EnvelopeError> {
        let mut salt = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt)
            .map_err(|err| EnvelopeError::KeyDerivation(err.to_string()))?;

        let wrap_key = derive_wrap_key(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(wrap_key.as_ref()));
        let sealed = cipher
            .encrypt(Nonce::from_slice(&[0u8; 12]), self.0.as_bytes().as_slice())
            .map_err(|_| EnvelopeError::Decrypt)?;

        let mut out = Vec::with_capacity(SECRET_FILE_LEN);
        out.extend_from_slice(&SECRET_MAGIC);
        out.extend_from_slice(&SECRET_VERSION.to_le_bytes());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&sealed);

        let mut open = fs::OpenOptions::new();
        open.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open.mode(0o600);
        }
        let mut file = open.open(path)?;
        file.write_all(&out)?;
        Ok(())
    }
}

/// Stretches a passphrase into a file wrapping key.
fn derive_wrap_key(passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, EnvelopeError> {
    let mut key = Zeroizing::new([0u8; 32]);
    argon2::Argon2::default()
        .hash_password_into(passphrase, salt, key.as_mut())
        .map_err(|err| EnvelopeError::KeyDerivation(err.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::{PublicKey, SecretKey};

    #[test]
    fn public_key_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (_, public) = SecretKey::generate().unwrap();
        let path = dir.path().join("key.pub");
        public.save(&path).unwrap();
        let loaded = PublicKey::load(&path).unwrap();
        assert_eq!(loaded.as_bytes(), public.as_bytes());
    }

    #[test]
    fn secret_key_file_round_trips_with_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let (secret, public) = SecretKey::generate().unwrap();
        let path = dir.path().join("key.sec");
        secret.save(&path, b"correct horse").unwrap();

        let loaded = SecretKey::load(&path, b"correct horse").unwrap();
        assert_eq!(loaded.public().as_bytes(), public.as_bytes());
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (secret, _) = SecretKey::generate().unwrap();
        let path = dir.path().join("key.sec");
        secret.save(&path, b"right").unwrap();
        assert!(matches!(
            SecretKey::load(&path, b"wrong"),
            Err(super::EnvelopeError::Passphrase)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn secret_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let (secret, _) = SecretKey::generate().unwrap();
        let path = dir.path().join("key.sec");
        secret.save(&path, b"pass").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
