//! swcache proxy entry point.
//!
//! Loads configuration, registers the first cache generation, and serves
//! until interrupted. On Unix, `SIGHUP` reloads the configuration and
//! registers a new generation; a changed `cache.version` replaces the stores.

use std::sync::Arc;

use anyhow::{Context, Result};
use swcache::cache::{CacheStorage, DiskStorage, MemoryStorage};
use swcache::config::{AppConfig, StorageKind};
use swcache::network::HttpOrigin;
use swcache::{Registration, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(upstream = %config.upstream, storage = ?config.storage, "starting swcache");

    let mut origin = HttpOrigin::new(config.upstream.clone());
    if let Some(timeout) = config.upstream_timeout() {
        origin = origin.with_timeout(timeout);
    }

    let storage: Arc<dyn CacheStorage> = match config.storage {
        StorageKind::Memory => match config.max_store_bytes {
            Some(limit) => Arc::new(MemoryStorage::with_quota(limit)),
            None => Arc::new(MemoryStorage::new()),
        },
        StorageKind::Disk => Arc::new(
            DiskStorage::open_root(&config.cache_dir)
                .await
                .with_context(|| format!("opening cache dir {}", config.cache_dir.display()))?,
        ),
    };

    let registration = Arc::new(Registration::new(Arc::new(origin), storage));
    if let Err(e) = registration.update(config.cache.clone()).await {
        // Requests pass straight through until a generation installs.
        tracing::error!(error = %e, "initial generation failed; serving uncached");
    }

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(Arc::clone(&registration)));

    let server = Server::bind(&config.listen_addr).await?;
    let handler_registration = Arc::clone(&registration);
    server
        .run_until(
            move |req| {
                let registration = Arc::clone(&handler_registration);
                async move { registration.handle(req).await }
            },
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
        )
        .await?;

    if let Some(active) = registration.active() {
        active.background().drain().await;
    }
    tracing::info!("stopped");
    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(registration: Arc<Registration>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGHUP; reload disabled");
            return;
        }
    };

    while hangups.recv().await.is_some() {
        let config = match AppConfig::load() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "reload rejected");
                continue;
            }
        };
        match registration.update(config.cache).await {
            Ok(generation) => tracing::info!(version = %generation.version(), "reloaded"),
            Err(e) => tracing::error!(error = %e, "reload failed; keeping current generation"),
        }
    }
}
