//! The network side of the proxy: where requests go when the cache cannot answer.
//!
//! [`Network`] is the single seam the controller fetches through. The real
//! implementation is [`HttpOrigin`], a tokio TCP client for one upstream
//! HTTP/1.1 origin.

use async_trait::async_trait;
use thiserror::Error;

use crate::http::response::ResponseError;
use crate::http::{Request, Response};

mod origin;

pub use origin::HttpOrigin;

#[cfg(test)]
pub(crate) mod fake;

/// Ways a fetch can fail before a response is available.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed upstream response: {0}")]
    Malformed(#[from] ResponseError),

    #[error("upstream response exceeds {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    #[error("network unreachable")]
    Unreachable,
}

/// Performs a request against the network.
///
/// Implementations resolve to a [`Response`] for anything the upstream
/// answered, including error statuses; only transport-level failures are
/// reported as [`NetworkError`].
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError>;
}
