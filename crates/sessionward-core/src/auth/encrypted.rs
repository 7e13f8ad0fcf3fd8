//! Passphrase-encrypted credential file for hosts without a keychain.
//!
//! Both tokens live in one file so a pair is always replaced as a whole:
//!
//! ```text
//! magic (4) | salt (16) | nonce (12) | ChaCha20-Poly1305 ciphertext
//! ```
//!
//! The key is derived from the passphrase and salt with Argon2id. A fresh
//! salt and nonce are drawn on every save.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credentials::{CredentialPair, CredentialStore, StorageError};

const CREDENTIALS_FILE: &str = "credentials.bin";
const FILE_MAGIC: &[u8; 4] = b"SWC1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = FILE_MAGIC.len() + SALT_LEN + NONCE_LEN;

/// Plaintext layout: each token under its own key
#[derive(Serialize, Deserialize, Default)]
struct StoredTokens {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

pub struct EncryptedFileStore {
    dir: PathBuf,
    passphrase: String,
}

impl EncryptedFileStore {
    pub fn new(dir: PathBuf, passphrase: String) -> Self {
        Self { dir, passphrase }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    /// Key derivation and file I/O block, so they run off the executor
    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf, String) -> Result<T, StorageError> + Send + 'static,
    {
        let path = self.path();
        let passphrase = self.passphrase.clone();
        tokio::task::spawn_blocking(move || op(path, passphrase))
            .await
            .map_err(|e| StorageError::Unavailable(format!("credential file task failed: {}", e)))?
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], StorageError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StorageError::Unavailable(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

fn seal(passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| StorageError::Unavailable("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(FILE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(passphrase: &str, data: &[u8]) -> Result<Vec<u8>, StorageError> {
    if data.len() <= HEADER_LEN || !data.starts_with(FILE_MAGIC) {
        return Err(StorageError::Corrupt("not a credential file".to_string()));
    }
    let (salt, rest) = data[FILE_MAGIC.len()..].split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StorageError::Corrupt("wrong passphrase or tampered file".to_string()))
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl CredentialStore for EncryptedFileStore {
    async fn save(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        let tokens = StoredTokens {
            access_token: Some(pair.access_token.clone()),
            refresh_token: Some(pair.refresh_token.clone()),
        };
        self.blocking(move |path, passphrase| {
            let plaintext = serde_json::to_vec(&tokens)
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            let sealed = seal(&passphrase, &plaintext)?;
            write_atomically(&path, &sealed)?;
            debug!(path = %path.display(), "Credentials written");
            Ok(())
        })
        .await
    }

    async fn load(&self) -> Result<Option<CredentialPair>, StorageError> {
        self.blocking(|path, passphrase| {
            let data = match std::fs::read(&path) {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let plaintext = open(&passphrase, &data)?;
            let tokens: StoredTokens = serde_json::from_slice(&plaintext)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
            Ok(match (tokens.access_token, tokens.refresh_token) {
                (Some(access), Some(refresh)) => Some(CredentialPair::new(access, refresh)),
                _ => None,
            })
        })
        .await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.blocking(|path, _| match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }
}
