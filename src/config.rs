use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::{BackendLocal, StorageManager};

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model (384 dimensions, small download)
const DEFAULT_SEMANTIC_MODEL: &str = "all-MiniLM-L6-v2";
/// Default similarity threshold for search
const DEFAULT_SEMANTIC_THRESHOLD: f32 = 0.6;
/// Default number of search results
const DEFAULT_SEMANTIC_LIMIT: usize = 10;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Default bound on a single remote repository call
const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is not valid utf8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration for embedding and similarity search
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SemanticSearchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    /// Scores must be strictly above this to be returned, in [-1.0, 1.0]
    #[serde(default = "default_semantic_threshold")]
    pub default_threshold: f32,

    #[serde(default = "default_semantic_limit")]
    pub default_limit: usize,

    /// Timeout for model download and initialization in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: DEFAULT_SEMANTIC_MODEL.to_string(),
            default_threshold: DEFAULT_SEMANTIC_THRESHOLD,
            default_limit: DEFAULT_SEMANTIC_LIMIT,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingCacheConfig {
    /// Upper bound on cached vectors; least recently used go first
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Keep a vectors.bin snapshot of the cache between runs
    #[serde(default)]
    pub persist: bool,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            persist: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_sync_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_auth: Option<RemoteAuth>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            remote_auth: None,
        }
    }
}

/// Credentials handed to HTTP repositories as-is.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteAuth {
    Bearer(String),
    Basic {
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

fn default_semantic_model() -> String {
    DEFAULT_SEMANTIC_MODEL.to_string()
}

fn default_semantic_threshold() -> f32 {
    DEFAULT_SEMANTIC_THRESHOLD
}

fn default_semantic_limit() -> usize {
    DEFAULT_SEMANTIC_LIMIT
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_sync_timeout_secs() -> u64 {
    DEFAULT_SYNC_TIMEOUT_SECS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,
    #[serde(default)]
    pub embedding_cache: EmbeddingCacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sem = &self.semantic_search;
        if !(-1.0..=1.0).contains(&sem.default_threshold) {
            return Err(ConfigError::Invalid {
                field: "semantic_search.default_threshold",
                reason: format!("must be between -1.0 and 1.0, got {}", sem.default_threshold),
            });
        }
        if sem.default_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "semantic_search.default_limit",
                reason: "must be greater than 0".to_string(),
            });
        }
        if sem.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "semantic_search.download_timeout_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.embedding_cache.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "embedding_cache.capacity",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.sync.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sync.timeout_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults when
    /// missing. A config that gained new default fields is saved back.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let store = BackendLocal::new(base_path)?;

        if !store.exists(CONFIG_FILE) {
            let defaults = serde_yml::to_string(&Self::default())?;
            store.write(CONFIG_FILE, defaults.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)?;
        let config: Self = serde_yml::from_str(&config_str)?;
        config.validate()?;

        if config_str != serde_yml::to_string(&config)? {
            log::info!("upgrading {CONFIG_FILE} with new defaults");
            config.save(base_path)?;
        }

        Ok(config)
    }

    pub fn save(&self, base_path: &Path) -> Result<(), ConfigError> {
        let store = BackendLocal::new(base_path)?;
        let config_str = serde_yml::to_string(self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }
}
