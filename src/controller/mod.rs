//! The cache controller. It decides, per request, whether the answer comes from
//! a store, the network, or both.
//!
//! A [`CacheController`] is one *generation*: a versioned pair of stores plus
//! the routing tables in its [`CacheConfig`]. It moves through a fixed
//! lifecycle driven by the host:
//!
//! ```text
//! Parsed ──install()──▶ Installing ──▶ Installed ──activate()──▶ Activating ──▶ Active
//!                           │                                        │
//!                           └──────────── failure ──────▶ Redundant ◀┘   retire()
//! ```
//!
//! While active, [`CacheController::fetch`] routes each request (first match wins):
//!
//! | Request                       | Strategy                  | When the network fails        |
//! |-------------------------------|---------------------------|-------------------------------|
//! | not `GET`                     | network only, untouched   | error returned to the host    |
//! | path under an excluded prefix | network only, never stored| `503` `{"error":"Offline"}`   |
//! | static-asset extension        | cache-first (STATIC)      | `503` `Offline`               |
//! | any other `GET`               | stale-while-revalidate    | offline page, else `503`      |
//!
//! A retired generation keeps answering the requests it already holds but no
//! longer writes to its stores, so a successor can prune them safely.
//!
//! Stores grow without bound; nothing here evicts entries. Cache read and
//! write failures are not retried: on the request path they surface as
//! [`FetchError::Cache`], and in background revalidation they are logged.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock as WriteGate;
use tracing::{debug, info, warn};

use crate::background::TaskQueue;
use crate::cache::{CacheEntry, CacheError, CacheStorage};
use crate::http::{Method, Request, Response, StatusCode};
use crate::network::{Network, NetworkError};

mod config;

pub use config::CacheConfig;

/// Lifecycle position of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed, not yet installing.
    Parsed,
    Installing,
    /// Precache complete; waiting to activate.
    Installed,
    Activating,
    /// Cleanup done; serving requests.
    Active,
    /// Failed to install or activate, or replaced by a newer generation.
    Redundant,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        })
    }
}

/// Which strategy a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Non-`GET`: forwarded as-is, never cached.
    Passthrough,
    /// Excluded prefix: network only, with a JSON offline error.
    NetworkOnly,
    /// Static asset: served from the STATIC store when present.
    CacheFirst,
    /// Page: served from the DYNAMIC store while it is refreshed.
    StaleWhileRevalidate,
}

/// Failures of the install and activate steps.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot {event} a generation in state {state}")]
    InvalidState { event: &'static str, state: State },

    #[error("precache fetch of {url} failed: {source}")]
    Precache {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("precache fetch of {url} returned {status}")]
    PrecacheStatus { url: String, status: StatusCode },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Failures that escape [`CacheController::fetch`].
///
/// Network failures on cached routes are turned into offline responses and
/// never appear here.
#[derive(Debug, Error)]
pub enum FetchError {
    /// A non-`GET` request failed upstream.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// A store read or write failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// One generation of the intercepting cache.
pub struct CacheController {
    config: CacheConfig,
    static_cache: String,
    dynamic_cache: String,
    network: Arc<dyn Network>,
    storage: Arc<dyn CacheStorage>,
    tasks: TaskQueue,
    state: RwLock<State>,
    /// `true` until [`CacheController::retire`]; held shared for every request-path write.
    writable: Arc<WriteGate<bool>>,
}

impl fmt::Debug for CacheController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheController")
            .field("version", &self.config.version)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CacheController {
    /// Creates a generation in [`State::Parsed`]. Nothing is fetched or stored yet.
    pub fn new(
        config: CacheConfig,
        network: Arc<dyn Network>,
        storage: Arc<dyn CacheStorage>,
    ) -> Self {
        Self {
            static_cache: config.static_cache(),
            dynamic_cache: config.dynamic_cache(),
            config,
            network,
            storage,
            tasks: TaskQueue::new(),
            state: RwLock::new(State::Parsed),
            writable: Arc::new(WriteGate::new(true)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    /// The names this generation keeps on activation: STATIC then DYNAMIC.
    pub fn cache_names(&self) -> [&str; 2] {
        [self.static_cache.as_str(), self.dynamic_cache.as_str()]
    }

    pub fn state(&self) -> State {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Background revalidations started by this generation.
    pub fn background(&self) -> &TaskQueue {
        &self.tasks
    }

    fn set_state(&self, next: State) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    // Moves `from` → `to` atomically, or reports the state we were actually in.
    fn transition(&self, event: &'static str, from: State, to: State) -> Result<(), LifecycleError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return Err(LifecycleError::InvalidState {
                event,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Precaches the manifest into the STATIC store.
    ///
    /// Every manifest URL is fetched before anything is written; the install
    /// succeeds only if all of them answer with a `2xx` status. A failed fetch
    /// leaves the STATIC store untouched; any failure makes the generation
    /// [`State::Redundant`].
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidState`] — not in [`State::Parsed`].
    /// - [`LifecycleError::Precache`] / [`LifecycleError::PrecacheStatus`] — a manifest fetch failed.
    /// - [`LifecycleError::Cache`] — the STATIC store could not be written.
    pub async fn install(&self) -> Result<(), LifecycleError> {
        self.transition("install", State::Parsed, State::Installing)?;
        info!(version = %self.config.version, urls = self.config.precache.len(), "installing");

        match self.precache().await {
            Ok(()) => {
                self.set_state(State::Installed);
                info!(version = %self.config.version, "installed");
                Ok(())
            }
            Err(e) => {
                self.set_state(State::Redundant);
                warn!(version = %self.config.version, error = %e, "install failed");
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<(), LifecycleError> {
        let mut fetched = Vec::with_capacity(self.config.precache.len());
        for url in &self.config.precache {
            let response = self
                .network
                .fetch(Request::get(url))
                .await
                .map_err(|source| LifecycleError::Precache {
                    url: url.clone(),
                    source,
                })?;
            if !response.is_ok() {
                return Err(LifecycleError::PrecacheStatus {
                    url: url.clone(),
                    status: response.status(),
                });
            }
            fetched.push((url, CacheEntry::from_response(&response)));
        }

        self.storage.open(&self.static_cache).await?;
        for (url, entry) in fetched {
            self.storage.put(&self.static_cache, url, entry).await?;
        }
        Ok(())
    }

    /// Deletes every store that does not belong to this generation and starts serving.
    ///
    /// Returns the names of the deleted stores.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidState`] — not in [`State::Installed`].
    /// - [`LifecycleError::Cache`] — listing or deleting stores failed; the
    ///   generation becomes [`State::Redundant`].
    pub async fn activate(&self) -> Result<Vec<String>, LifecycleError> {
        self.transition("activate", State::Installed, State::Activating)?;

        match self.prune().await {
            Ok(deleted) => {
                self.set_state(State::Active);
                info!(version = %self.config.version, deleted = ?deleted, "activated");
                Ok(deleted)
            }
            Err(e) => {
                self.set_state(State::Redundant);
                warn!(version = %self.config.version, error = %e, "activation failed");
                Err(e.into())
            }
        }
    }

    async fn prune(&self) -> Result<Vec<String>, CacheError> {
        let keep = self.cache_names();
        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if keep.contains(&name.as_str()) {
                continue;
            }
            if self.storage.delete(&name).await? {
                debug!(cache = %name, "deleted stale cache");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Marks the generation as replaced and stops it writing to its stores.
    ///
    /// Waits for writes already under way. Requests and revalidations still in
    /// flight finish normally but their responses are no longer stored.
    pub async fn retire(&self) {
        *self.writable.write().await = false;
        self.set_state(State::Redundant);
        debug!(version = %self.config.version, "retired");
    }

    /// Picks the strategy for `request`, first match wins.
    pub fn classify(&self, request: &Request) -> Route {
        if request.method() != &Method::Get {
            Route::Passthrough
        } else if self.config.is_excluded(request.path()) {
            Route::NetworkOnly
        } else if self.config.is_static_asset(request.path()) {
            Route::CacheFirst
        } else {
            Route::StaleWhileRevalidate
        }
    }

    /// Answers an intercepted request.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] — only for non-`GET` requests, which are passed
    ///   through without any fallback.
    /// - [`FetchError::Cache`] — a store read or write failed.
    pub async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        let route = self.classify(&request);
        debug!(method = %request.method(), url = %request.url(), route = ?route, "intercepted");

        match route {
            Route::Passthrough => Ok(self.network.fetch(request).await?),
            Route::NetworkOnly => Ok(self.network_only(request).await),
            Route::CacheFirst => self.cache_first(request).await,
            Route::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        }
    }

    async fn network_only(&self, request: Request) -> Response {
        let url = request.url();
        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "network-only request failed");
                offline_json()
            }
        }
    }

    async fn cache_first(&self, request: Request) -> Result<Response, FetchError> {
        let url = request.url();
        if let Some(hit) = self.storage.match_in(&self.static_cache, &url).await? {
            debug!(url = %url, "static hit");
            return Ok(hit.to_response());
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    store(
                        &self.writable,
                        self.storage.as_ref(),
                        &self.static_cache,
                        &url,
                        CacheEntry::from_response(&response),
                    )
                    .await?;
                }
                Ok(response)
            }
            Err(e) => {
                debug!(url = %url, error = %e, "static miss while offline");
                Ok(offline_text())
            }
        }
    }

    async fn stale_while_revalidate(&self, request: Request) -> Result<Response, FetchError> {
        let url = request.url();
        let cached = self.storage.match_in(&self.dynamic_cache, &url).await?;

        let refreshed = self.tasks.spawn(revalidate(
            Arc::clone(&self.network),
            Arc::clone(&self.storage),
            Arc::clone(&self.writable),
            self.dynamic_cache.clone(),
            url.clone(),
            request,
        ));

        if let Some(entry) = cached {
            debug!(url = %url, "serving cached page, revalidating in background");
            return Ok(entry.to_response());
        }

        match refreshed.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => self.offline_page().await,
        }
    }

    async fn offline_page(&self) -> Result<Response, FetchError> {
        match self.storage.match_any(&self.config.offline_page).await? {
            Some(entry) => Ok(entry.to_response()),
            None => Ok(offline_text()),
        }
    }
}

// Puts `entry` unless the generation was retired. Returns whether it was written.
async fn store(
    writable: &WriteGate<bool>,
    storage: &dyn CacheStorage,
    cache: &str,
    url: &str,
    entry: CacheEntry,
) -> Result<bool, CacheError> {
    let open = writable.read().await;
    if !*open {
        debug!(cache = %cache, url = %url, "generation retired; not storing");
        return Ok(false);
    }
    storage.put(cache, url, entry).await?;
    Ok(true)
}

// Fetches `request` and, on a 2xx, replaces the DYNAMIC entry. Store failures
// are logged; the fetched response is still returned.
async fn revalidate(
    network: Arc<dyn Network>,
    storage: Arc<dyn CacheStorage>,
    writable: Arc<WriteGate<bool>>,
    cache: String,
    url: String,
    request: Request,
) -> Result<Response, NetworkError> {
    let response = match network.fetch(request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(url = %url, error = %e, "revalidation fetch failed");
            return Err(e);
        }
    };

    if response.is_ok() {
        match store(
            &writable,
            storage.as_ref(),
            &cache,
            &url,
            CacheEntry::from_response(&response),
        )
        .await
        {
            Ok(true) => debug!(cache = %cache, url = %url, "revalidated"),
            Ok(false) => {}
            Err(e) => warn!(cache = %cache, url = %url, error = %e, "failed to store revalidated page"),
        }
    }
    Ok(response)
}

fn offline_text() -> Response {
    Response::new(StatusCode::ServiceUnavailable)
        .header("Content-Type", "text/plain")
        .body("Offline")
}

fn offline_json() -> Response {
    Response::json(StatusCode::ServiceUnavailable, &json!({ "error": "Offline" }))
}
