//! Generation management: the host side of the controller lifecycle.
//!
//! A [`Registration`] owns the currently active [`CacheController`] and the
//! collaborators every generation shares. [`Registration::update`] drives a
//! new generation through install and activate and swaps it in only when
//! both succeed; until then, and on failure, the previous generation keeps
//! serving.

use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};

use crate::cache::CacheStorage;
use crate::controller::{CacheConfig, CacheController, FetchError, LifecycleError};
use crate::http::{Request, Response, StatusCode};
use crate::network::Network;

/// Holds the active generation and dispatches requests to it.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use swcache::{CacheConfig, Registration, Request};
/// use swcache::cache::MemoryStorage;
/// use swcache::network::HttpOrigin;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let registration = Registration::new(
///     Arc::new(HttpOrigin::new("127.0.0.1:3000")),
///     Arc::new(MemoryStorage::new()),
/// );
/// registration.update(CacheConfig::default()).await?;
/// let response = registration.handle(Request::get("/")).await;
/// # Ok(())
/// # }
/// ```
pub struct Registration {
    network: Arc<dyn Network>,
    storage: Arc<dyn CacheStorage>,
    active: RwLock<Option<Arc<CacheController>>>,
}

impl Registration {
    pub fn new(network: Arc<dyn Network>, storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            network,
            storage,
            active: RwLock::new(None),
        }
    }

    /// The generation currently serving requests, if any.
    pub fn active(&self) -> Option<Arc<CacheController>> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Installs a generation built from `config`, retires its predecessor,
    /// then activates the new one and makes it the active generation.
    ///
    /// The predecessor stops writing before activation prunes its stores, so
    /// nothing it still has in flight can recreate them.
    ///
    /// # Errors
    ///
    /// Returns the [`LifecycleError`] of the failed step. After a failed
    /// install the previous generation stays in place unchanged. After a
    /// failed activation it stays in place but no longer caches.
    pub async fn update(&self, config: CacheConfig) -> Result<Arc<CacheController>, LifecycleError> {
        let version = config.version.clone();
        let candidate = Arc::new(CacheController::new(
            config,
            Arc::clone(&self.network),
            Arc::clone(&self.storage),
        ));

        if let Err(e) = candidate.install().await {
            warn!(version = %version, error = %e, "new generation failed to install; keeping current one");
            return Err(e);
        }

        let previous = self.active();
        if let Some(previous) = &previous {
            previous.retire().await;
        }

        if let Err(e) = candidate.activate().await {
            error!(version = %version, error = %e, "new generation failed to activate; current one serves uncached");
            return Err(e);
        }

        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&candidate));
        match previous {
            Some(previous) => info!(from = %previous.version(), to = %version, "generation replaced"),
            None => info!(version = %version, "generation registered"),
        }

        Ok(candidate)
    }

    /// Answers `request` through the active generation.
    ///
    /// Without an active generation the request goes straight to the network.
    /// Errors that escape the controller become `502 Bad Gateway`.
    pub async fn handle(&self, request: Request) -> Response {
        let result = match self.active() {
            Some(controller) => controller.fetch(request).await,
            None => self.network.fetch(request).await.map_err(FetchError::from),
        };

        result.unwrap_or_else(|e| {
            error!(error = %e, "request failed");
            Response::new(StatusCode::BadGateway).body(format!("Bad Gateway: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::controller::State;
    use crate::http::Method;
    use crate::network::fake::FakeNetwork;

    fn config(version: &str) -> CacheConfig {
        CacheConfig {
            version: version.into(),
            precache: vec!["/".into()],
            ..Default::default()
        }
    }

    fn setup() -> (Arc<FakeNetwork>, Arc<MemoryStorage>, Registration) {
        let network = Arc::new(FakeNetwork::new());
        let storage = Arc::new(MemoryStorage::new());
        let registration = Registration::new(network.clone(), storage.clone());
        (network, storage, registration)
    }

    #[tokio::test]
    async fn without_generation_requests_pass_through() {
        let (network, storage, registration) = setup();
        network.serve("/style.css", "css");

        let res = registration.handle(Request::get("/style.css")).await;

        assert_eq!(res.status(), StatusCode::Ok);
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn version_bump_replaces_generation_and_stores() {
        let (network, storage, registration) = setup();
        network.serve("/", "home").serve("/about", "about");

        let first = registration.update(config("v1")).await.unwrap();
        registration.handle(Request::get("/about")).await;
        assert!(storage.has("dynamic-v1").await.unwrap());

        let second = registration.update(config("v2")).await.unwrap();

        assert_eq!(first.state(), State::Redundant);
        assert_eq!(second.state(), State::Active);
        assert_eq!(registration.active().unwrap().version(), "v2");
        assert_eq!(storage.keys().await.unwrap(), vec!["static-v2".to_owned()]);
    }

    #[tokio::test]
    async fn replaced_generation_cannot_recreate_pruned_store() {
        let (network, storage, registration) = setup();
        network.serve("/", "home").serve("/slow", "slow page");
        let first = registration.update(config("v1")).await.unwrap();
        registration.handle(Request::get("/slow")).await;
        first.background().drain().await;

        // Served from cache; the revalidation waits on the origin.
        let release = network.hold("/slow");
        let res = registration.handle(Request::get("/slow")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(first.background().pending(), 1);

        registration.update(config("v2")).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["static-v2".to_owned()]);

        release.notify_one();
        first.background().drain().await;
        assert_eq!(storage.keys().await.unwrap(), vec!["static-v2".to_owned()]);
    }

    #[tokio::test]
    async fn failed_install_keeps_previous_generation() {
        let (network, storage, registration) = setup();
        network.serve("/", "home");
        registration.update(config("v1")).await.unwrap();

        network.set_offline(true);
        let err = registration.update(config("v2")).await.unwrap_err();

        assert!(matches!(err, LifecycleError::Precache { .. }));
        let active = registration.active().unwrap();
        assert_eq!(active.version(), "v1");
        assert_eq!(active.state(), State::Active);
        assert!(storage.has("static-v1").await.unwrap());
        assert!(!storage.has("static-v2").await.unwrap());
    }

    #[tokio::test]
    async fn escaped_errors_become_bad_gateway() {
        let (network, _storage, registration) = setup();
        network.serve("/", "home");
        registration.update(config("v1")).await.unwrap();
        network.set_offline(true);

        let res = registration
            .handle(Request::new(Method::Delete, "/api/session"))
            .await;
        assert_eq!(res.status(), StatusCode::BadGateway);
    }
}
