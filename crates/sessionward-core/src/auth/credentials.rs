use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::{Config, StorageBackend, ENV_STORE_PASSPHRASE};

use super::encrypted::EncryptedFileStore;

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// The two tokens that make up a session. Only ever valid as a whole.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    fn byte_len(&self) -> usize {
        self.access_token.len() + self.refresh_token.len()
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Credential storage unavailable: {0}")]
    Unavailable(String),

    #[error("Stored credentials are unreadable: {0}")]
    Corrupt(String),

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable persistence for the credential pair.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, pair: &CredentialPair) -> Result<(), StorageError>;

    /// `None` unless both tokens are present
    async fn load(&self) -> Result<Option<CredentialPair>, StorageError>;

    /// Remove both tokens. Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Open the store selected by the configuration
pub fn open_credential_store(config: &Config) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match config.storage {
        StorageBackend::Keyring => Arc::new(KeyringCredentialStore::new(&config.keyring_service)),
        StorageBackend::EncryptedFile => {
            let passphrase = std::env::var(ENV_STORE_PASSPHRASE).with_context(|| {
                format!("{} must be set to use the encrypted file store", ENV_STORE_PASSPHRASE)
            })?;
            Arc::new(EncryptedFileStore::new(config.data_dir()?, passphrase))
        }
        StorageBackend::Memory => Arc::new(MemoryCredentialStore::new()),
    };
    Ok(store)
}

// ============================================================================
// OS keychain
// ============================================================================

/// One keychain entry per token under a shared service name.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(service: &str, key: &str) -> Result<Entry, StorageError> {
        Entry::new(service, key).map_err(map_keyring_error)
    }

    fn read(service: &str, key: &str) -> Result<Option<String>, StorageError> {
        match Self::entry(service, key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn remove(service: &str, key: &str) -> Result<(), StorageError> {
        match Self::entry(service, key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    /// Keychain calls block, so they run off the async executor
    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(String) -> Result<T, StorageError> + Send + 'static,
    {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || op(service))
            .await
            .map_err(|e| StorageError::Unavailable(format!("keychain task failed: {}", e)))?
    }
}

/// Write both tokens as separate entries. If the refresh token cannot be
/// written, both entries are removed so the new access token never sits
/// next to a stale refresh token.
fn write_pair<W, R>(pair: &CredentialPair, mut write: W, mut remove: R) -> Result<(), StorageError>
where
    W: FnMut(&str, &str) -> Result<(), StorageError>,
    R: FnMut(&str) -> Result<(), StorageError>,
{
    write(ACCESS_TOKEN_KEY, &pair.access_token)?;
    if let Err(e) = write(REFRESH_TOKEN_KEY, &pair.refresh_token) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(cleanup) = remove(key) {
                warn!(key, error = %cleanup, "Failed to roll back partial credential write");
            }
        }
        return Err(e);
    }
    Ok(())
}

fn map_keyring_error(err: keyring::Error) -> StorageError {
    match err {
        keyring::Error::TooLong(attr, limit) => {
            StorageError::QuotaExceeded(format!("{} exceeds {} bytes", attr, limit))
        }
        keyring::Error::BadEncoding(_) => StorageError::Corrupt(err.to_string()),
        other => StorageError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn save(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        let pair = pair.clone();
        self.blocking(move |service| {
            write_pair(
                &pair,
                |key, value| {
                    Self::entry(&service, key)?
                        .set_password(value)
                        .map_err(map_keyring_error)
                },
                |key| Self::remove(&service, key),
            )
        })
        .await
    }

    async fn load(&self) -> Result<Option<CredentialPair>, StorageError> {
        self.blocking(|service| {
            let access = Self::read(&service, ACCESS_TOKEN_KEY)?;
            let refresh = Self::read(&service, REFRESH_TOKEN_KEY)?;
            Ok(match (access, refresh) {
                (Some(access), Some(refresh)) => Some(CredentialPair::new(access, refresh)),
                _ => None,
            })
        })
        .await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.blocking(|service| {
            let access = Self::remove(&service, ACCESS_TOKEN_KEY);
            let refresh = Self::remove(&service, REFRESH_TOKEN_KEY);
            access.and(refresh)
        })
        .await
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store with an optional byte quota.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<&'static str, String>>,
    quota: Option<usize>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject saves whose combined token length exceeds `max_bytes`
    pub fn with_quota(max_bytes: usize) -> Self {
        Self {
            quota: Some(max_bytes),
            ..Self::default()
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop a single key, leaving a half pair behind
    #[cfg(test)]
    pub fn remove_key(&self, key: &str) {
        self.entries().retain(|k, _| *k != key);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn save(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            if pair.byte_len() > quota {
                return Err(StorageError::QuotaExceeded(format!(
                    "{} bytes requested, {} allowed",
                    pair.byte_len(),
                    quota
                )));
            }
        }
        let mut entries = self.entries();
        entries.insert(ACCESS_TOKEN_KEY, pair.access_token.clone());
        entries.insert(REFRESH_TOKEN_KEY, pair.refresh_token.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<CredentialPair>, StorageError> {
        let entries = self.entries();
        Ok(match (entries.get(ACCESS_TOKEN_KEY), entries.get(REFRESH_TOKEN_KEY)) {
            (Some(access), Some(refresh)) => Some(CredentialPair::new(access.clone(), refresh.clone())),
            _ => None,
        })
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries().clear();
        Ok(())
    }
}
