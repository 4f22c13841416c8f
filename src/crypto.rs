//! Per-entry authenticated encryption and content addressing.
//!
//! Ciphertext layout is `nonce (12 bytes) || ciphertext || tag (16 bytes)`,
//! hex-encoded when written to disk.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::VaultError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

/// Appended to an entry's text before hashing it into a filename.
pub const FILENAME_SALT: &str = "file contents";

/// Hex SHA-256 of `text` followed by [`FILENAME_SALT`].
pub fn content_address(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(FILENAME_SALT.as_bytes());
    hex::encode(hasher.finalize())
}

/// Symmetric key derived from the session password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EntryCipher {
    key: [u8; KEY_SIZE],
}

impl EntryCipher {
    /// The key is the SHA-256 digest of the password.
    pub fn from_password(password: &str) -> Self {
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&Sha256::digest(password.as_bytes()));
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> crate::Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| VaultError::Crypto("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> crate::Result<Vec<u8>> {
        if data.len() < NONCE_SIZE {
            return Err(VaultError::Crypto("ciphertext too short".to_string()));
        }
        let (nonce, sealed) = data.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| VaultError::Crypto("authentication failed".to_string()))
    }

    /// Encrypts and hex-encodes, the on-disk representation.
    pub fn seal_hex(&self, plaintext: &[u8]) -> crate::Result<String> {
        Ok(hex::encode(self.encrypt(plaintext)?))
    }

    pub fn open_hex(&self, contents: &str) -> crate::Result<Vec<u8>> {
        let data = hex::decode(contents.trim())
            .map_err(|e| VaultError::Crypto(format!("invalid hex: {}", e)))?;
        self.decrypt(&data)
    }
}

impl std::fmt::Debug for EntryCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryCipher").field("key", &"[REDACTED]").finish()
    }
}
