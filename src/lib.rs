//! # swcache
//!
//! An offline-first HTTP caching proxy. Every request from a client passes
//! through a versioned cache controller that serves static assets
//! cache-first, pages stale-while-revalidate, and keeps API calls on the
//! network with a structured offline error.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swcache::{CacheConfig, Registration, Server};
//! use swcache::cache::MemoryStorage;
//! use swcache::network::HttpOrigin;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registration = Arc::new(Registration::new(
//!         Arc::new(HttpOrigin::new("127.0.0.1:3000")),
//!         Arc::new(MemoryStorage::new()),
//!     ));
//!     registration.update(CacheConfig::default()).await?;
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(move |req| {
//!         let registration = Arc::clone(&registration);
//!         async move { registration.handle(req).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod cache;
pub mod config;
pub mod controller;
pub mod http;
pub mod network;
pub mod registration;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use controller::{CacheConfig, CacheController, FetchError, LifecycleError, Route, State};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use registration::Registration;
pub use server::{Server, ServerError};
