//! Application configuration management.
//!
//! This module handles loading the configuration that tells the session
//! manager where the API lives and where to keep credentials.
//!
//! Configuration is stored at `~/.config/sessionward/config.json`. A missing
//! file yields the defaults; `SESSIONWARD_API_URL` and `SESSIONWARD_STORAGE`
//! override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessionward";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default API base URL, used when neither the file nor the environment set one
const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

pub const ENV_API_URL: &str = "SESSIONWARD_API_URL";
pub const ENV_STORAGE: &str = "SESSIONWARD_STORAGE";
pub const ENV_STORE_PASSPHRASE: &str = "SESSIONWARD_STORE_PASSPHRASE";

/// Where the credential pair is persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted file in the data directory
    EncryptedFile,
    /// Process memory only; nothing survives a restart
    Memory,
}

impl StorageBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyring" => Some(Self::Keyring),
            "encrypted-file" | "file" => Some(Self::EncryptedFile),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub storage: StorageBackend,
    pub keyring_service: String,
    pub max_rate_limit_retries: u32,
    pub initial_backoff_ms: u64,
    /// Directory for rolling log files; stderr only when unset
    pub log_dir: Option<PathBuf>,
    /// Last email used to sign in, offered as the default by the CLI
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            storage: StorageBackend::default(),
            keyring_service: APP_NAME.to_string(),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            log_dir: None,
            last_email: None,
        }
    }
}

impl Config {
    /// Load from the default location and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (normally the process environment)
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_STORAGE) {
            match StorageBackend::parse(&raw) {
                Some(backend) => self.storage = backend,
                None => tracing::warn!(value = %raw, "Unknown storage backend, keeping configured one"),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the encrypted credential file
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}
