use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{Network, NetworkError};
use crate::http::{Request, Response};

/// Maximum size of an upstream response we will buffer (32 MiB).
const MAX_RESPONSE_SIZE: usize = 32 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 8192;

/// HTTP/1.1 client for a single upstream origin.
///
/// Every fetch opens a fresh TCP connection, sends the request with
/// `Connection: close`, and reads until the origin closes the stream.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use swcache::network::{HttpOrigin, Network};
/// use swcache::http::Request;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let origin = HttpOrigin::new("127.0.0.1:3000").with_timeout(Duration::from_secs(10));
/// let response = origin.fetch(Request::get("/")).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    addr: String,
    timeout: Option<Duration>,
}

impl HttpOrigin {
    /// Targets the origin at `addr` (`host:port`). No timeout is applied.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: None,
        }
    }

    /// Bounds each whole fetch (connect, send, receive) by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn exchange(&self, request: &Request) -> Result<Response, NetworkError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| NetworkError::Connect {
                addr: self.addr.clone(),
                source,
            })?;

        stream.write_all(&request.to_bytes(&self.addr)).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        loop {
            let read = stream.read_buf(&mut buf).await?;
            if read == 0 {
                break;
            }
            if buf.len() > MAX_RESPONSE_SIZE {
                return Err(NetworkError::TooLarge {
                    max_bytes: MAX_RESPONSE_SIZE,
                });
            }
        }

        Ok(Response::parse(&buf, request.method())?)
    }
}

#[async_trait]
impl Network for HttpOrigin {
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        debug!(origin = %self.addr, method = %request.method(), url = %request.url(), "fetching upstream");

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(&request))
                .await
                .unwrap_or(Err(NetworkError::Timeout(limit))),
            None => self.exchange(&request).await,
        };

        if let Err(e) = &result {
            warn!(origin = %self.addr, url = %request.url(), error = %e, "upstream fetch failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, StatusCode};
    use tokio::net::TcpListener;

    // Accepts one connection, records the request head, and replies with `reply`.
    async fn one_shot_origin(reply: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(reply).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn fetches_and_parses_response() {
        let (addr, seen) =
            one_shot_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        let origin = HttpOrigin::new(addr.clone());

        let res = origin.fetch(Request::get("/index.html")).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_ref().as_ref(), b"hello");

        let head = seen.await.unwrap();
        assert!(head.starts_with("GET /index.html HTTP/1.1\r\n"));
        assert!(head.contains(&format!("Host: {addr}\r\n")));
    }

    #[tokio::test]
    async fn error_statuses_are_responses() {
        let (addr, _seen) = one_shot_origin(b"HTTP/1.1 500 Internal Server Error\r\n\r\n").await;
        let res = HttpOrigin::new(addr).fetch(Request::get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn head_reply_without_body_is_complete() {
        let (addr, seen) =
            one_shot_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n").await;

        let res = HttpOrigin::new(addr)
            .fetch(Request::new(Method::Head, "/"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        assert!(res.body_ref().is_empty());
        assert!(seen.await.unwrap().starts_with("HEAD / HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn unnamed_status_is_passed_through() {
        let (addr, _seen) = one_shot_origin(
            b"HTTP/1.1 451 Unavailable For Legal Reasons\r\nContent-Length: 6\r\n\r\ndenied",
        )
        .await;

        let res = HttpOrigin::new(addr)
            .fetch(Request::new(Method::Post, "/quote"))
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 451);
        assert_eq!(res.body_ref().as_ref(), b"denied");
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = HttpOrigin::new(addr).fetch(Request::get("/")).await.unwrap_err();
        assert!(matches!(err, NetworkError::Connect { .. }));
    }

    #[tokio::test]
    async fn silent_origin_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let origin = HttpOrigin::new(addr).with_timeout(Duration::from_millis(50));
        let err = origin.fetch(Request::get("/")).await.unwrap_err();
        assert!(matches!(err, NetworkError::Timeout(_)));
    }
}
