use serde::{Deserialize, Serialize};

use crate::cache::cache_name;

/// Settings for one controller generation.
///
/// Changing [`version`](Self::version) produces new store names, so the next
/// generation starts from empty stores and its activation deletes the old ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Generation tag appended to every store name.
    #[serde(default = "default_version")]
    pub version: String,

    /// Prefix of the long-lived asset store.
    #[serde(default = "default_static_prefix")]
    pub static_prefix: String,

    /// Prefix of the page store refreshed by stale-while-revalidate.
    #[serde(default = "default_dynamic_prefix")]
    pub dynamic_prefix: String,

    /// URLs fetched and stored during install. Every one must succeed.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// URL of the page served when a page request fails and nothing is cached.
    #[serde(default = "default_offline_page")]
    pub offline_page: String,

    /// Path prefixes that always go to the network and are never stored.
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,

    /// File extensions (without the dot) served cache-first.
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,
}

fn default_version() -> String {
    "v1".into()
}

fn default_static_prefix() -> String {
    "static".into()
}

fn default_dynamic_prefix() -> String {
    "dynamic".into()
}

fn default_precache() -> Vec<String> {
    ["/", "/offline", "/icon.svg", "/manifest.json"]
        .map(String::from)
        .to_vec()
}

fn default_offline_page() -> String {
    "/offline".into()
}

fn default_excluded_prefixes() -> Vec<String> {
    vec!["/api/".into()]
}

fn default_static_extensions() -> Vec<String> {
    [
        "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico", "woff",
        "woff2", "ttf", "otf",
    ]
    .map(String::from)
    .to_vec()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            static_prefix: default_static_prefix(),
            dynamic_prefix: default_dynamic_prefix(),
            precache: default_precache(),
            offline_page: default_offline_page(),
            excluded_prefixes: default_excluded_prefixes(),
            static_extensions: default_static_extensions(),
        }
    }
}

impl CacheConfig {
    /// Name of this generation's asset store, e.g. `static-v1`.
    pub fn static_cache(&self) -> String {
        cache_name(&self.static_prefix, &self.version)
    }

    /// Name of this generation's page store, e.g. `dynamic-v1`.
    pub fn dynamic_cache(&self) -> String {
        cache_name(&self.dynamic_prefix, &self.version)
    }

    /// Returns `true` if `path` starts with one of the excluded prefixes.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Returns `true` if the last segment of `path` ends in `.<ext>` for an
    /// allowed extension. Matching is case-sensitive.
    pub fn is_static_asset(&self, path: &str) -> bool {
        let Some((_, ext)) = path.rsplit_once('.') else {
            return false;
        };
        !ext.contains('/') && self.static_extensions.iter().any(|allowed| allowed == ext)
    }
}
