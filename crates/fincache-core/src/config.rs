//! Worker configuration.
//!
//! Every constant the intermediary relies on lives here: the partition
//! version, the local assets pre-populated on install, the allow-list of
//! external content-delivery hosts, background task tags and endpoints, and
//! the notification icon/badge paths.
//!
//! Configuration is read from `~/.config/fincache/config.json` when present.
//! Missing fields fall back to the defaults below.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fincache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Version suffix shared by the static and dynamic partitions.
/// Bumping it makes every partition from the previous version stale on activate.
const DEFAULT_CACHE_VERSION: &str = "v1";

/// HTTP request timeout in seconds.
/// 30s allows for slow CDN responses while failing fast enough to fall back to cache.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How long a handling episode waits for its fire-and-forget work.
const DEFAULT_EPISODE_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid origin '{0}': {1}")]
    InvalidOrigin(String, String),

    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, String),

    #[error("Partition prefixes must differ (both are '{0}')")]
    DuplicatePrefix(String),

    #[error("Could not find {0} directory")]
    MissingDirectory(&'static str),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub cache_version: String,
    pub static_prefix: String,
    pub dynamic_prefix: String,
    /// Origin the foreground application is served from (scheme, host, port).
    pub origin: String,
    /// Local asset paths cached into the static partition on install.
    pub static_assets: Vec<String>,
    /// External resources cached into the dynamic partition on install.
    pub external_resources: Vec<String>,
    /// Hostname substrings of recognized content-delivery origins.
    pub cdn_hosts: Vec<String>,
    /// Document served to navigations when both cache and network miss.
    pub offline_document: String,
    pub exchange_rates_url: String,
    pub exchange_rates_key: String,
    pub sync_tag: String,
    pub periodic_sync_tag: String,
    pub notification_title: String,
    pub notification_icon: String,
    pub notification_badge: String,
    pub request_timeout_secs: u64,
    pub episode_timeout_secs: u64,
    /// Directory for the durable partition mirror. `None` uses the platform cache dir.
    pub cache_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            static_prefix: "fincache-static".to_string(),
            dynamic_prefix: "fincache-dynamic".to_string(),
            origin: "http://localhost:8080".to_string(),
            static_assets: to_strings(&[
                "/",
                "/index.html",
                "/manifest.json",
                "/styles.css",
                "/app.js",
                "/icons/icon-192x192.png",
            ]),
            external_resources: to_strings(&[
                "https://cdn.jsdelivr.net/npm/chart.js",
                "https://cdnjs.cloudflare.com/ajax/libs/PapaParse/5.4.1/papaparse.min.js",
                "https://cdnjs.cloudflare.com/ajax/libs/pdf.js/3.11.174/pdf.min.js",
                "https://cdn.jsdelivr.net/npm/tesseract.js@5/dist/tesseract.min.js",
            ]),
            cdn_hosts: to_strings(&[
                "cdn.jsdelivr.net",
                "cdnjs.cloudflare.com",
                "unpkg.com",
                "fonts.googleapis.com",
                "fonts.gstatic.com",
            ]),
            offline_document: "/index.html".to_string(),
            exchange_rates_url: "https://api.exchangerate-api.com/v4/latest/USD".to_string(),
            exchange_rates_key: "/api/exchange-rates".to_string(),
            sync_tag: "sync-transactions".to_string(),
            periodic_sync_tag: "update-exchange-rates".to_string(),
            notification_title: "Finance Dashboard".to_string(),
            notification_icon: "/icons/icon-192x192.png".to_string(),
            notification_badge: "/icons/badge-72x72.png".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            episode_timeout_secs: DEFAULT_EPISODE_TIMEOUT_SECS,
            cache_dir: None,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl WorkerConfig {
    /// Load from the platform config directory, or defaults if no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::MissingDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `FINCACHE_ORIGIN` and `FINCACHE_CACHE_DIR` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(origin) = std::env::var("FINCACHE_ORIGIN") {
            self.origin = origin;
        }
        if let Ok(dir) = std::env::var("FINCACHE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    /// Check every URL-shaped setting before the worker starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin_url()?;
        for asset in &self.static_assets {
            self.resolve(asset)?;
        }
        for resource in &self.external_resources {
            Url::parse(resource).map_err(|e| ConfigError::InvalidUrl(resource.clone(), e.to_string()))?;
        }
        Url::parse(&self.exchange_rates_url)
            .map_err(|e| ConfigError::InvalidUrl(self.exchange_rates_url.clone(), e.to_string()))?;
        if self.static_prefix == self.dynamic_prefix {
            return Err(ConfigError::DuplicatePrefix(self.static_prefix.clone()));
        }
        Ok(())
    }

    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin)
            .map_err(|e| ConfigError::InvalidOrigin(self.origin.clone(), e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidOrigin(
                self.origin.clone(),
                "scheme must be http or https".to_string(),
            ));
        }
        Ok(url)
    }

    /// Resolve a local path (e.g. `/index.html`) against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin_url()?
            .join(path)
            .map_err(|e| ConfigError::InvalidUrl(path.to_string(), e.to_string()))
    }

    pub fn static_cache_name(&self) -> String {
        format!("{}-{}", self.static_prefix, self.cache_version)
    }

    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-{}", self.dynamic_prefix, self.cache_version)
    }

    /// Names of the partitions that survive activation.
    pub fn current_cache_names(&self) -> HashSet<String> {
        HashSet::from([self.static_cache_name(), self.dynamic_cache_name()])
    }

    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::MissingDirectory("cache"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
