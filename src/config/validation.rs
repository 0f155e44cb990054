//! Configuration validation rules.

use thiserror::Error;

use crate::config::{AppConfig, StorageKind};

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `listen_addr` or `upstream` is empty
    /// - `upstream_timeout_ms` is 0
    /// - `max_store_bytes` is 0
    /// - the cache version or a store prefix is empty or contains a path separator
    /// - the offline page, a precache URL, or an excluded prefix does not start with `/`
    /// - a static extension is empty or starts with `.`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.is_empty() {
            return Err(invalid("listen_addr", "must not be empty"));
        }
        if self.upstream.is_empty() {
            return Err(invalid("upstream", "must not be empty"));
        }
        if self.upstream_timeout_ms == Some(0) {
            return Err(invalid("upstream_timeout_ms", "must be greater than 0"));
        }
        if self.max_store_bytes == Some(0) {
            return Err(invalid("max_store_bytes", "must be greater than 0"));
        }
        if self.max_store_bytes.is_some() && self.storage == StorageKind::Disk {
            tracing::warn!("max_store_bytes only applies to the memory backend; ignoring it");
        }

        let cache = &self.cache;
        for (field, value) in [
            ("cache.version", &cache.version),
            ("cache.static_prefix", &cache.static_prefix),
            ("cache.dynamic_prefix", &cache.dynamic_prefix),
        ] {
            if value.is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
            if value.contains(['/', '\\']) {
                return Err(invalid(field, "must not contain a path separator"));
            }
        }
        if cache.static_prefix == cache.dynamic_prefix {
            return Err(invalid(
                "cache.dynamic_prefix",
                "must differ from cache.static_prefix",
            ));
        }

        if !cache.offline_page.starts_with('/') {
            return Err(invalid("cache.offline_page", "must start with '/'"));
        }
        if cache.precache.iter().any(|url| !url.starts_with('/')) {
            return Err(invalid("cache.precache", "every URL must start with '/'"));
        }
        if cache.excluded_prefixes.iter().any(|p| !p.starts_with('/')) {
            return Err(invalid(
                "cache.excluded_prefixes",
                "every prefix must start with '/'",
            ));
        }
        if cache
            .static_extensions
            .iter()
            .any(|ext| ext.is_empty() || ext.starts_with('.'))
        {
            return Err(invalid(
                "cache.static_extensions",
                "extensions are listed without the leading dot",
            ));
        }

        if !cache.precache.contains(&cache.offline_page) {
            tracing::warn!(
                offline_page = %cache.offline_page,
                "offline page is not precached; page requests may fall back to a bare 503"
            );
        }

        Ok(())
    }
}
