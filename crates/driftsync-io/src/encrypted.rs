// ── Encryption at rest ──
//
// Documents are sealed with AES-256-GCM under a key derived from a
// passphrase (SHA-256). Stored form: base64(nonce || ciphertext || tag),
// with a fresh random 96-bit nonce per save.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as B64};
use ring::aead::{self, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use driftsync_core::{StorageBackend, StorageError};

/// Encrypting wrapper around another backend.
pub struct EncryptedStorage {
    inner: Arc<dyn StorageBackend>,
    key: LessSafeKey,
    random: SystemRandom,
}

impl fmt::Debug for EncryptedStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedStorage")
            .field("algorithm", self.key.algorithm())
            .finish_non_exhaustive()
    }
}

impl EncryptedStorage {
    pub fn new(
        inner: Arc<dyn StorageBackend>,
        passphrase: &SecretString,
    ) -> Result<Self, StorageError> {
        let hash = digest::digest(&digest::SHA256, passphrase.expose_secret().as_bytes());
        let unbound = UnboundKey::new(&aead::AES_256_GCM, hash.as_ref()).map_err(|_| {
            StorageError::Encryption {
                key: "<passphrase>".into(),
            }
        })?;
        Ok(Self {
            inner,
            key: LessSafeKey::new(unbound),
            random: SystemRandom::new(),
        })
    }

    fn seal(&self, key: &str, document: String) -> Result<String, StorageError> {
        let failure = || StorageError::Encryption { key: key.to_owned() };

        let mut raw_nonce = [0_u8; NONCE_LEN];
        self.random.fill(&mut raw_nonce).map_err(|_| failure())?;

        let mut in_out = document.into_bytes();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(raw_nonce),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| failure())?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&raw_nonce);
        sealed.extend_from_slice(&in_out);
        Ok(B64.encode(sealed))
    }

    fn open(&self, key: &str, stored: &str) -> Result<String, StorageError> {
        let failure = || StorageError::Encryption { key: key.to_owned() };

        let sealed = B64.decode(stored.trim()).map_err(|e| StorageError::Corrupt {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
        if sealed.len() < NONCE_LEN {
            return Err(failure());
        }
        let (raw_nonce, cipher_text) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(raw_nonce).map_err(|_| failure())?;

        let mut in_out = cipher_text.to_vec();
        let plain = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| {
                warn!(key, "document could not be decrypted");
                failure()
            })?;
        String::from_utf8(plain.to_vec()).map_err(|_| failure())
    }
}

#[async_trait]
impl StorageBackend for EncryptedStorage {
    async fn save(&self, key: &str, document: String) -> Result<(), StorageError> {
        let sealed = self.seal(key, document)?;
        self.inner.save(key, sealed).await
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.inner.load(key).await? {
            Some(stored) => self.open(key, &stored).map(Some),
            None => Ok(None),
        }
    }
}
