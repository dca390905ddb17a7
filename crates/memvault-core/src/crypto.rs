//! Symmetric encryption for snapshot blobs and long-term item content.
//!
//! Every message is sealed with ChaCha20-Poly1305 under a fresh random
//! 96-bit nonce. Sealed bytes are framed as `MAGIC || VERSION || nonce ||
//! ciphertext`; text columns carry the same bytes base64-encoded.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Key length in bytes (256-bit)
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes (96-bit)
pub const NONCE_LEN: usize = 12;

const MAGIC: &[u8; 4] = b"MVLT";
const VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1;

/// An active symmetric key and the cipher operations built on it.
///
/// Key bytes are wiped from memory when the cipher is dropped.
pub struct Cipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl Cipher {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        for byte in key.iter_mut() {
            *byte = rand::random();
        }
        Self { key }
    }

    /// Build a cipher from raw key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(Error::InvalidKey(format!(
                "expected {} bytes, found {}",
                KEY_LEN,
                bytes.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Raw key bytes (for persisting the key file)
    pub fn key_bytes(&self) -> &[u8] {
        &self.key[..]
    }

    /// Short, non-reversible identifier of the key for logs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"memvault-fingerprint");
        hasher.update(&self.key[..]);
        hex::encode(&hasher.finalize()[..4])
    }

    /// Seal arbitrary bytes
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key[..])
            .map_err(|e| Error::encryption(format!("cipher creation failed: {}", e)))?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(MAGIC);
        sealed.push(VERSION);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open bytes produced by [`Cipher::encrypt`]
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < HEADER_LEN + NONCE_LEN {
            return Err(Error::decryption("ciphertext too short"));
        }
        if &sealed[..MAGIC.len()] != MAGIC {
            return Err(Error::decryption("missing ciphertext header"));
        }
        if sealed[MAGIC.len()] != VERSION {
            return Err(Error::decryption(format!(
                "unsupported ciphertext version {}",
                sealed[MAGIC.len()]
            )));
        }

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key[..])
            .map_err(|e| Error::decryption(format!("cipher creation failed: {}", e)))?;
        let (nonce, ciphertext) = sealed[HEADER_LEN..].split_at(NONCE_LEN);

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::decryption("authentication tag mismatch"))
    }

    /// Seal text into a base64 string
    pub fn encrypt_text(&self, plaintext: &str) -> Result<String> {
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes())?))
    }

    /// Open a base64 string produced by [`Cipher::encrypt_text`]
    pub fn decrypt_text(&self, encoded: &str) -> Result<String> {
        let sealed = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::decryption(format!("invalid base64: {}", e)))?;
        let plaintext = self.decrypt(&sealed)?;
        String::from_utf8(plaintext).map_err(|e| Error::decryption(format!("invalid utf-8: {}", e)))
    }

    /// Keyed hash of an index term. The same term always maps to the same
    /// token under one key, and reveals nothing without it.
    pub fn index_token(&self, term: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"memvault-index");
        hasher.update(&self.key[..]);
        hasher.update(term.as_bytes());
        hex::encode(&hasher.finalize()[..12])
    }
}

/// Key loaded from (or freshly written to) a key file
#[derive(Debug)]
pub struct LoadedKey {
    pub cipher: Cipher,
    pub created_at: DateTime<Utc>,
    pub generated: bool,
}

/// Load the key at `path`, generating and persisting a new one if absent.
pub fn load_or_create_key(path: &Path) -> Result<LoadedKey> {
    if path.exists() {
        let bytes = Zeroizing::new(fs::read(path)?);
        let cipher = Cipher::from_bytes(&bytes)?;
        let created_at = key_created_at(path)?;
        return Ok(LoadedKey {
            cipher,
            created_at,
            generated: false,
        });
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let cipher = Cipher::generate();
    write_key_file(path, &cipher)?;
    tracing::info!(path = %path.display(), fingerprint = %cipher.fingerprint(), "Generated new encryption key");

    Ok(LoadedKey {
        cipher,
        created_at: Utc::now(),
        generated: true,
    })
}

/// Write raw key bytes with restricted permissions (0600)
pub fn write_key_file(path: &Path, cipher: &Cipher) -> Result<()> {
    fs::write(path, cipher.key_bytes())?;
    restrict_permissions(path)?;
    Ok(())
}

/// Creation time of a key, taken from its file's modification time
pub fn key_created_at(path: &Path) -> Result<DateTime<Utc>> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

#[cfg(unix)]
pub(crate) fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = Cipher::generate();
        let sealed = cipher.encrypt(b"User is allergic to peanuts").unwrap();

        assert_ne!(&sealed[HEADER_LEN + NONCE_LEN..], b"User is allergic to peanuts");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"User is allergic to peanuts");
    }

    #[test]
    fn test_nonce_is_fresh_per_message() {
        let cipher = Cipher::generate();
        let a = cipher.encrypt_text("same").unwrap();
        let b = cipher.encrypt_text("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt_text(&a).unwrap(), "same");
        assert_eq!(cipher.decrypt_text(&b).unwrap(), "same");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = Cipher::generate().encrypt(b"secret").unwrap();
        let err = Cipher::generate().decrypt(&sealed).unwrap_err();
        assert!(err.is_decryption());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = Cipher::generate();
        let mut sealed = cipher.encrypt(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.decrypt(&sealed).unwrap_err().is_decryption());

        assert!(cipher.decrypt(b"MV").unwrap_err().is_decryption());
        assert!(cipher.decrypt_text("not base64 at all!").unwrap_err().is_decryption());
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(Cipher::from_bytes(&[0u8; 16]), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_index_token_is_keyed() {
        let a = Cipher::generate();
        let b = Cipher::generate();
        assert_eq!(a.index_token("cof"), a.index_token("cof"));
        assert_ne!(a.index_token("cof"), a.index_token("off"));
        assert_ne!(a.index_token("cof"), b.index_token("cof"));
    }

    #[test]
    fn test_load_or_create_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join("content.key");

        let first = load_or_create_key(&path).unwrap();
        assert!(first.generated);
        assert_eq!(std::fs::read(&path).unwrap().len(), KEY_LEN);

        let second = load_or_create_key(&path).unwrap();
        assert!(!second.generated);
        assert_eq!(first.cipher.key_bytes(), second.cipher.key_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.key");
        load_or_create_key(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
