use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Complete credcache configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Where the credential slot lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// SQLite database file (ignored by the memory backend)
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Slot name; prefixes every storage key
    #[serde(default = "default_slot")]
    pub slot: String,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("credentials.db")
}

fn default_slot() -> String {
    crate::manager::DEFAULT_SLOT.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
            slot: default_slot(),
        }
    }
}

/// Encryption configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionConfig {
    /// Environment variable holding the base64 master key
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

fn default_key_env() -> String {
    "CREDCACHE_ENCRYPTION_KEY".to_string()
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
        }
    }
}

/// Refresh transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// OAuth token endpoint URL
    #[serde(default)]
    pub token_url: String,
    /// OAuth client ID
    #[serde(default)]
    pub client_id: String,
    /// HTTP timeout for one refresh call (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            token_url: String::new(),
            client_id: String::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Validity policy defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// min_ttl applied by the binary when none is given (seconds)
    #[serde(default)]
    pub default_min_ttl: u64,
}

impl CacheConfig {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment overrides on top of the loaded values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("CREDCACHE_STORAGE_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CREDCACHE_SLOT") {
            if !v.is_empty() {
                self.storage.slot = v;
            }
        }
        if let Ok(v) = std::env::var("CREDCACHE_TOKEN_URL") {
            self.refresh.token_url = v;
        }
        if let Ok(v) = std::env::var("CREDCACHE_CLIENT_ID") {
            self.refresh.client_id = v;
        }
        self
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<CacheConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config: CacheConfig = toml::from_str(&contents).context("Failed to parse config")?;
    Ok(config)
}
