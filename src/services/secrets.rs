//! Token encryption at rest.
//!
//! OAuth tokens are sealed with AES-256-GCM before they touch the database and
//! only opened by the token manager. Ciphertext format is `iv:tag:ciphertext`
//! with hex-encoded fields, so a leaked database dump exposes no credentials.
//!
//! The rest of the sync engine treats this as an opaque seal/open boundary;
//! the algorithm choice is not load-bearing anywhere else.

use crate::error::SyncError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

/// AES-GCM nonce length in bytes.
const NONCE_LENGTH: usize = 12;

/// AES-GCM authentication tag length in bytes.
const TAG_LENGTH: usize = 16;

/// Seals and opens stored credentials.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl TokenCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Encrypt a plaintext token. Output is `iv:tag:ciphertext`, all hex.
    pub fn seal(&self, plaintext: &str) -> Result<String, SyncError> {
        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, Payload::from(plaintext.as_bytes()))
            .map_err(|_| SyncError::secret("Encryption failed"))?;

        // aes-gcm appends the tag to the ciphertext; split it back out to
        // match the iv:tag:ciphertext storage format.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LENGTH);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypt a sealed token produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &str) -> Result<String, SyncError> {
        let parts: Vec<&str> = sealed.split(':').collect();
        if parts.len() != 3 {
            return Err(SyncError::secret("Invalid encrypted data format"));
        }

        let nonce_bytes = hex::decode(parts[0])
            .map_err(|_| SyncError::secret("Invalid nonce encoding"))?;
        let tag = hex::decode(parts[1]).map_err(|_| SyncError::secret("Invalid tag encoding"))?;
        let ciphertext = hex::decode(parts[2])
            .map_err(|_| SyncError::secret("Invalid ciphertext encoding"))?;

        if nonce_bytes.len() != NONCE_LENGTH || tag.len() != TAG_LENGTH {
            return Err(SyncError::secret("Invalid encrypted data format"));
        }

        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut combined = ciphertext;
        combined.extend_from_slice(&tag);

        let plaintext = cipher
            .decrypt(nonce, Payload::from(combined.as_slice()))
            .map_err(|_| SyncError::secret("Decryption failed (wrong key or tampered data)"))?;

        String::from_utf8(plaintext).map_err(|_| SyncError::secret("Decrypted data is not UTF-8"))
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug formatting
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}
