//! Proxy configuration with layered loading.
//!
//! Loading precedence (highest wins):
//!
//! 1. Environment variables (`SWCACHE_*`, nested keys joined with `__`,
//!    e.g. `SWCACHE_CACHE__VERSION=v2`)
//! 2. TOML config file (if `SWCACHE_CONFIG_FILE` is set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::controller::CacheConfig;

mod validation;

pub use validation::ConfigError;

/// Where cached responses live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Disk,
}

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the proxy listens on.
    ///
    /// Set via SWCACHE_LISTEN_ADDR.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Upstream origin (`host:port`) that requests are forwarded to.
    ///
    /// Set via SWCACHE_UPSTREAM.
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Optional bound on each upstream fetch, in milliseconds. Unset means no timeout.
    ///
    /// Set via SWCACHE_UPSTREAM_TIMEOUT_MS.
    #[serde(default)]
    pub upstream_timeout_ms: Option<u64>,

    /// Storage backend for the cache stores.
    ///
    /// Set via SWCACHE_STORAGE (`memory` or `disk`).
    #[serde(default = "default_storage")]
    pub storage: StorageKind,

    /// Root directory for the `disk` backend.
    ///
    /// Set via SWCACHE_CACHE_DIR.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Per-store byte quota for the `memory` backend. Unset means unbounded.
    ///
    /// Set via SWCACHE_MAX_STORE_BYTES.
    #[serde(default)]
    pub max_store_bytes: Option<usize>,

    /// Settings of the controller generation to register.
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".into()
}

fn default_upstream() -> String {
    "127.0.0.1:3000".into()
}

fn default_storage() -> StorageKind {
    StorageKind::Memory
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./swcache-data")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream: default_upstream(),
            upstream_timeout_ms: None,
            storage: default_storage(),
            cache_dir: default_cache_dir(),
            max_store_bytes: None,
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Upstream timeout as a `Duration`, if one is configured.
    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_ms.map(Duration::from_millis)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - the configuration file cannot be read or parsed
    /// - environment variables cannot be parsed
    /// - validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SWCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SWCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
