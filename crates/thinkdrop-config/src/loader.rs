use std::path::{Path, PathBuf};
use std::str::FromStr;

use thinkdrop_common::{Error, Result};
use tracing::{info, warn};

use crate::model::AppConfig;

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        Ok(Self {
            config_dir: Self::default_config_dir(),
        })
    }

    pub fn default_config_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".thinkdrop"))
            .unwrap_or_else(|| PathBuf::from(".thinkdrop"))
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load the config file (YAML preferred, TOML fallback), then apply
    /// environment variable overrides on top.
    pub fn load(&self) -> Result<AppConfig> {
        // Pick up a local .env before reading the environment.
        let _ = dotenvy::dotenv();

        let mut config = self.load_file()?;
        apply_env_overrides(&mut config);
        Ok(config)
    }

    fn load_file(&self) -> Result<AppConfig> {
        let yaml_path = self.config_dir.join("config.yml");
        let toml_path = self.config_dir.join("config.toml");

        if yaml_path.exists() {
            info!("loading config from {}", yaml_path.display());
            let contents = std::fs::read_to_string(&yaml_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))
        } else if toml_path.exists() {
            info!("loading config from {}", toml_path.display());
            let contents = std::fs::read_to_string(&toml_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
        } else {
            info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [
            self.config_dir.clone(),
            self.config_dir.join("data"),
            self.config_dir.join("screens"),
            self.config_dir.join("skills"),
        ];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        Ok(())
    }
}

/// Apply the recognised environment variables over the file-derived config.
/// Malformed values are warned and ignored rather than failing startup.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Some(host) = env_string("HOST") {
        config.server.host = host;
    }
    if let Some(port) = env_parse::<u16>("PORT") {
        config.server.port = port;
    }
    if let Some(keys) = env_string("API_KEY") {
        config.server.api_keys = split_csv(&keys);
    }
    if let Some(origins) = env_string("ALLOWED_ORIGINS") {
        config.server.allowed_origins = split_csv(&origins);
    }
    if let Some(path) = env_string("DB_PATH") {
        config.database.path = PathBuf::from(path);
    }
    if let Some(size) = env_parse::<usize>("EMBEDDING_CACHE_SIZE") {
        config.embedding.cache_size = size;
    }
    if let Some(ttl) = env_parse::<u64>("EMBEDDING_CACHE_TTL") {
        config.embedding.cache_ttl_ms = ttl;
    }
    if let Some(sim) = env_parse::<f32>("MIN_SIMILARITY_THRESHOLD") {
        config.search.min_similarity = sim;
    }
    if let Some(days) = env_parse::<u32>("MAX_AGE_DAYS") {
        config.search.max_age_days = days;
    }
    if let Some(interval) = env_parse::<u64>("SCREEN_CAPTURE_INTERVAL") {
        config.monitor.capture_interval_ms = interval;
    }
    if let Some(idle) = env_parse::<u64>("SCREEN_CAPTURE_IDLE_TIMEOUT") {
        config.monitor.idle_timeout_ms = idle;
    }
    if let Some(threshold) = env_parse::<f32>("SCREEN_CAPTURE_DIFF_THRESHOLD") {
        config.monitor.diff_threshold = threshold;
    }
    if let Some(enabled) = env_bool("MONITOR_SCREEN_OCR") {
        config.monitor.enabled = enabled;
    }
    if let Some(user) = env_string("MONITOR_USER_ID") {
        config.monitor.user_id = user;
    }
    if let Some(enabled) = env_bool("RETENTION_ENABLED") {
        config.retention.enabled = enabled;
    }
    if let Some(days) = env_parse::<u32>("RETENTION_MAX_DAYS") {
        config.retention.max_days = days;
    }
    if let Some(days) = env_parse::<u32>("RETENTION_PURGE_DAYS") {
        config.retention.purge_days = days;
    }
    if let Some(hours) = env_parse::<u32>("RETENTION_CHECK_INTERVAL_HOURS") {
        config.retention.check_interval_hours = hours;
    }
}

fn env_string(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring malformed {name}={raw:?}");
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = env_string(name)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!("ignoring malformed {name}={other:?}");
            None
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
