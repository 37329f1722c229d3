use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            monitor: MonitorConfig::default(),
            retention: RetentionConfig::default(),
            log_level: Some("info".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Accepted bearer keys. Empty list disables auth (local development).
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// CORS allow-list. Empty list means no cross-origin access.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_keys: Vec::new(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Records older than this many days are excluded from search.
    /// Zero disables the cutoff.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            max_age_days: default_max_age_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_user_id")]
    pub user_id: String,

    #[serde(default = "default_capture_interval_ms")]
    pub capture_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user_id: default_user_id(),
            capture_interval_ms: default_capture_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            diff_threshold: default_diff_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum dataset age before the oldest window is purged.
    #[serde(default = "default_retention_max_days")]
    pub max_days: u32,

    /// How many days of the oldest history one purge removes.
    #[serde(default = "default_retention_purge_days")]
    pub purge_days: u32,

    #[serde(default = "default_retention_check_interval_hours")]
    pub check_interval_hours: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_days: default_retention_max_days(),
            purge_days: default_retention_purge_days(),
            check_interval_hours: default_retention_check_interval_hours(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/user_memory.db")
}

fn default_cache_size() -> usize {
    1000
}

fn default_cache_ttl_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_min_similarity() -> f32 {
    0.3
}

fn default_max_age_days() -> u32 {
    30
}

fn default_user_id() -> String {
    "default_user".to_string()
}

fn default_capture_interval_ms() -> u64 {
    10_000
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_diff_threshold() -> f32 {
    0.15
}

fn default_true() -> bool {
    true
}

fn default_retention_max_days() -> u32 {
    1825
}

fn default_retention_purge_days() -> u32 {
    365
}

fn default_retention_check_interval_hours() -> u32 {
    24
}
