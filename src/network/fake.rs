//! Scripted [`Network`] for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Network, NetworkError};
use crate::http::{Request, Response, StatusCode};

#[derive(Default)]
pub(crate) struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    calls: Mutex<Vec<String>>,
    held: Mutex<HashMap<String, Arc<Notify>>>,
    offline: AtomicBool,
    hang: AtomicBool,
}

impl FakeNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answers `url` with `200 OK` and `body`.
    pub(crate) fn serve(&self, url: &str, body: &str) -> &Self {
        self.respond(url, Response::new(StatusCode::Ok).body(body.to_owned()))
    }

    pub(crate) fn respond(&self, url: &str, response: Response) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_owned(), response);
        self
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every fetch from now on never resolves.
    pub(crate) fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Fetches of `url` wait until the returned handle is notified.
    pub(crate) fn hold(&self, url: &str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.held
            .lock()
            .unwrap()
            .insert(url.to_owned(), Arc::clone(&release));
        release
    }

    /// `"METHOD url"` for every fetch observed, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", request.method(), request.url()));

        let held = self.held.lock().unwrap().get(&request.url()).cloned();
        if let Some(release) = held {
            release.notified().await;
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable);
        }

        let routes = self.routes.lock().unwrap();
        Ok(routes
            .get(&request.url())
            .cloned()
            .unwrap_or_else(|| Response::new(StatusCode::NotFound).body("Not Found")))
    }
}
