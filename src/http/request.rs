//! HTTP/1.1 request parsing using the [`httparse`] crate, plus the outbound
//! side: building requests in-process and serializing them for an upstream.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// An HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer, or by
/// [`Request::new`] / [`Request::get`] when the proxy itself originates the
/// request (precaching, revalidation). The body is stored as a [`Bytes`]
/// buffer, so cloning a request is cheap.
///
/// # Examples
///
/// ```
/// use swcache::http::request::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.url(), "/hello?name=world");
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds an HTTP/1.1 request for `target` (a path with an optional query string).
    ///
    /// # Examples
    ///
    /// ```
    /// use swcache::http::{Method, Request};
    ///
    /// let req = Request::new(Method::Post, "/api/contact?src=footer");
    /// assert_eq!(req.path(), "/api/contact");
    /// assert_eq!(req.query_string(), Some("src=footer"));
    /// ```
    pub fn new(method: Method, target: impl AsRef<str>) -> Self {
        let (path, query) = split_target(target.as_ref());
        Self {
            method,
            path,
            version: 1,
            headers: Headers::new(),
            query,
            body: Bytes::new(),
        }
    }

    /// Shorthand for `Request::new(Method::Get, target)`.
    pub fn get(target: impl AsRef<str>) -> Self {
        Self::new(Method::Get, target)
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator). The
    /// body is bounded by `Content-Length`; any bytes past it belong to the
    /// next pipelined request and are left out.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — more data is needed to complete the request headers.
    /// - [`RequestError::Parse`] — the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`] — a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let (path, query) = split_target(raw_path);

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let rest = &buf[body_offset..];
        let body_len = header_map
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map_or(rest.len(), |len| len.min(rest.len()));
        let body = Bytes::copy_from_slice(&rest[..body_len]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body,
            },
            body_offset,
        ))
    }

    /// Serializes the request for an upstream origin at `host`.
    ///
    /// The `Host` header is rewritten to `host`, the connection is marked
    /// `close` (one request per upstream connection), and `Content-Length` is
    /// recomputed from the body.
    pub fn to_bytes(&self, host: &str) -> BytesMut {
        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + self.body.len());

        buf.put(format!("{} {} HTTP/1.1\r\n", self.method, self.url()).as_bytes());
        buf.put(format!("Host: {host}\r\n").as_bytes());
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("host") || super::headers::is_hop_by_hop(name) {
                continue;
            }
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(&b"Connection: close\r\n"[..]);
        if !self.body.is_empty() || !self.method.is_safe() {
            buf.put(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_ref());

        buf
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request target as sent on the wire: the path plus `?query` when present.
    ///
    /// This is the key under which cached responses are stored.
    pub fn url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{q}", self.path),
            None => self.path.clone(),
        }
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1, // HTTP/1.1 default: keep-alive
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

// Splits `/path?query` into its two halves.
fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len()); // no body
    }

    #[test]
    fn parse_keeps_raw_query() {
        let raw = b"GET /search?q=rust&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&page=2"));
        assert_eq!(req.url(), "/search?q=rust&page=2");
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn keep_alive_http11_default() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(req.is_keep_alive());
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn content_length() {
        let raw = b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&raw[body_offset..], b"hello");
        assert_eq!(req.body().as_ref(), b"hello");
    }

    #[test]
    fn pipelined_bytes_stay_out_of_the_body() {
        let raw = b"POST /a HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET /b HTTP/1.1\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.body().as_ref(), b"ok");
    }

    #[test]
    fn built_request_has_no_query_by_default() {
        let req = Request::get("/style.css");
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.url(), "/style.css");
        assert!(req.query_string().is_none());
        assert!(req.body().is_empty());
    }

    #[test]
    fn to_bytes_rewrites_host_and_closes() {
        let req = Request::get("/dashboard?tab=1")
            .header("Host", "proxy.local:8080")
            .header("Connection", "keep-alive")
            .header("Accept", "text/html");
        let wire = String::from_utf8(req.to_bytes("origin.local:3000").to_vec()).unwrap();
        assert!(wire.starts_with("GET /dashboard?tab=1 HTTP/1.1\r\nHost: origin.local:3000\r\n"));
        assert!(wire.contains("Accept: text/html\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(!wire.contains("proxy.local"));
        assert!(!wire.contains("keep-alive"));
        assert!(!wire.contains("Content-Length"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn to_bytes_carries_body_length() {
        let req = Request::new(Method::Post, "/api/quote").with_body("{\"a\":1}");
        let wire = String::from_utf8(req.to_bytes("origin").to_vec()).unwrap();
        assert!(wire.contains("Content-Length: 7\r\n"));
        assert!(wire.ends_with("\r\n\r\n{\"a\":1}"));
    }

    #[test]
    fn round_trips_through_the_wire() {
        let req = Request::new(Method::Put, "/api/item/7").with_body("data");
        let wire = req.to_bytes("origin");
        let (parsed, _) = Request::parse(&wire).unwrap();
        assert_eq!(parsed.method(), &Method::Put);
        assert_eq!(parsed.path(), "/api/item/7");
        assert_eq!(parsed.body().as_ref(), b"data");
    }
}
