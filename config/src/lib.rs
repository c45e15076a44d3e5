//! Datamart Configuration
//!
//! Shared configuration crate for all Datamart components.
//!
//! Handles loading configuration from:
//! 1. DM_CONFIG env var (explicit path)
//! 2. ./config.toml (current directory)
//! 3. ~/.datamart/config.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::{env, fs};

/// Global config instance for convenience access
pub static GLOBAL_CONFIG: OnceLock<DatamartConfig> = OnceLock::new();

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".datamart";

// ============================================================================
// Default Constants (avoid repeated allocations)
// ============================================================================

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9000";
const DEFAULT_PACKAGE_ID: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

const DEFAULT_THRESHOLD_K: usize = 2;
const DEFAULT_THRESHOLD_N: usize = 3;
const DEFAULT_SESSION_TTL_MIN: u64 = 30;
const DEFAULT_KEY_REQUEST_TIMEOUT_MS: u64 = 30_000;

const DEFAULT_STORAGE_EPOCHS: u64 = 100;
const DEFAULT_AGGREGATOR_URL: &str = "http://127.0.0.1:31415";

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatamartConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub seal: SealTomlConfig,
    #[serde(default)]
    pub storage: StorageTomlConfig,
}

/// Ledger connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Marketplace package ID (hex object id of the published package)
    #[serde(default = "default_package_id")]
    pub package_id: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.into(),
            package_id: DEFAULT_PACKAGE_ID.into(),
        }
    }
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.into()
}

fn default_package_id() -> String {
    DEFAULT_PACKAGE_ID.into()
}

/// A single key server entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyServerEntry {
    pub endpoint: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Threshold encryption (seal) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealTomlConfig {
    /// Key server endpoints
    #[serde(default)]
    pub key_servers: Vec<KeyServerEntry>,
    /// Threshold K: minimum key servers needed to decrypt
    #[serde(default = "default_threshold_k")]
    pub threshold_k: usize,
    /// Total key servers N
    #[serde(default = "default_threshold_n")]
    pub threshold_n: usize,
    /// Session credential time-to-live in minutes
    #[serde(default = "default_session_ttl")]
    pub session_ttl_min: u64,
    /// Per-request timeout for key server round trips (ms)
    #[serde(default = "default_key_request_timeout")]
    pub key_request_timeout_ms: u64,
}

impl Default for SealTomlConfig {
    fn default() -> Self {
        Self {
            key_servers: Vec::new(),
            threshold_k: DEFAULT_THRESHOLD_K,
            threshold_n: DEFAULT_THRESHOLD_N,
            session_ttl_min: DEFAULT_SESSION_TTL_MIN,
            key_request_timeout_ms: DEFAULT_KEY_REQUEST_TIMEOUT_MS,
        }
    }
}

fn default_threshold_k() -> usize {
    DEFAULT_THRESHOLD_K
}
fn default_threshold_n() -> usize {
    DEFAULT_THRESHOLD_N
}
fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_MIN
}
fn default_key_request_timeout() -> u64 {
    DEFAULT_KEY_REQUEST_TIMEOUT_MS
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageTomlConfig {
    /// Number of storage epochs to claim when registering a blob
    #[serde(default = "default_storage_epochs")]
    pub epochs: u64,
    /// Aggregator endpoint for blob reads
    #[serde(default = "default_aggregator_url")]
    pub aggregator_url: String,
    /// Whether registered blobs are deletable by their owner
    #[serde(default)]
    pub deletable: bool,
}

impl Default for StorageTomlConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_STORAGE_EPOCHS,
            aggregator_url: DEFAULT_AGGREGATOR_URL.into(),
            deletable: false,
        }
    }
}

fn default_storage_epochs() -> u64 {
    DEFAULT_STORAGE_EPOCHS
}
fn default_aggregator_url() -> String {
    DEFAULT_AGGREGATOR_URL.into()
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

/// Set field from env var if present
fn env_string(key: &str, field: &mut String) {
    if let Ok(v) = env::var(key) {
        *field = v;
    }
}

/// Set field from env var if present and parseable
fn env_parse<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(v) = env::var(key) {
        if let Ok(parsed) = v.parse() {
            *field = parsed;
        }
    }
}

/// Check if env var is set to a truthy value ("1" or "true")
fn env_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Parse key server list from an env string.
/// Format: "endpoint1,weight1;endpoint2,weight2" (weight optional)
fn parse_key_servers(raw: &str) -> Vec<KeyServerEntry> {
    raw.split(';')
        .filter(|s| !s.trim().is_empty())
        .map(|server| {
            let mut parts = server.splitn(2, ',');
            let endpoint = parts.next().unwrap_or_default().trim().to_string();
            let weight = parts
                .next()
                .and_then(|w| w.trim().parse().ok())
                .unwrap_or(1);
            KeyServerEntry { endpoint, weight }
        })
        .collect()
}

// ============================================================================
// Implementation
// ============================================================================

impl DatamartConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check DM_CONFIG env var
        if let Ok(path) = env::var("DM_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Check ./config.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.datamart/config.toml
        dirs::home_dir()
            .map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Ledger
        env_string("DM_RPC_URL", &mut self.ledger.rpc_url);
        env_string("DM_PACKAGE_ID", &mut self.ledger.package_id);

        // Seal
        if let Ok(raw) = env::var("DM_SEAL_KEY_SERVERS") {
            self.seal.key_servers = parse_key_servers(&raw);
        }
        env_parse("DM_SEAL_THRESHOLD_K", &mut self.seal.threshold_k);
        env_parse("DM_SEAL_THRESHOLD_N", &mut self.seal.threshold_n);
        env_parse("DM_SESSION_TTL_MIN", &mut self.seal.session_ttl_min);
        env_parse(
            "DM_KEY_REQUEST_TIMEOUT_MS",
            &mut self.seal.key_request_timeout_ms,
        );

        // Storage
        env_parse("DM_STORAGE_EPOCHS", &mut self.storage.epochs);
        env_string("DM_AGGREGATOR_URL", &mut self.storage.aggregator_url);
        if let Some(v) = env_bool("DM_STORAGE_DELETABLE") {
            self.storage.deletable = v;
        }
    }

    /// Validate the loaded configuration, returning all problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.ledger.package_id == DEFAULT_PACKAGE_ID {
            errors.push("ledger.package_id not configured".to_string());
        }
        if self.seal.key_servers.is_empty() {
            errors.push("seal.key_servers not configured".to_string());
        }
        if self.seal.threshold_k == 0 || self.seal.threshold_k > self.seal.threshold_n {
            errors.push(format!(
                "invalid seal threshold: k={}, n={}",
                self.seal.threshold_k, self.seal.threshold_n
            ));
        }
        if self.seal.session_ttl_min == 0 {
            errors.push("seal.session_ttl_min must be positive".to_string());
        }

        errors
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.seal.key_servers = vec![
            KeyServerEntry {
                endpoint: "https://keys-0.datamart.dev".into(),
                weight: 1,
            },
            KeyServerEntry {
                endpoint: "https://keys-1.datamart.dev".into(),
                weight: 1,
            },
            KeyServerEntry {
                endpoint: "https://keys-2.datamart.dev".into(),
                weight: 1,
            },
        ];
        toml::to_string_pretty(&sample).unwrap_or_default()
    }

    /// Get the global config instance, initializing it if necessary.
    ///
    /// This is the recommended way to access config in most code.
    /// Falls back to defaults if loading fails.
    pub fn global() -> &'static DatamartConfig {
        GLOBAL_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                log::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            })
        })
    }

    /// Try to get the global config instance.
    ///
    /// Returns `None` if config hasn't been initialized yet.
    pub fn try_global() -> Option<&'static DatamartConfig> {
        GLOBAL_CONFIG.get()
    }

    /// Initialize the global config with a specific instance.
    ///
    /// Returns `Err(config)` if already initialized.
    pub fn set_global(config: DatamartConfig) -> Result<(), DatamartConfig> {
        GLOBAL_CONFIG.set(config)
    }
}

/// Shorthand for `DatamartConfig::global()`.
#[inline]
pub fn global_config() -> &'static DatamartConfig {
    DatamartConfig::global()
}
