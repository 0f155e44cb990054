//! HTTP/1.1 responses.
//!
//! Provides a fluent builder API for constructing HTTP responses, serializing
//! them to a byte buffer for transmission over TCP, and parsing the responses
//! an upstream origin sends back.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method, StatusCode};

/// Errors that can occur while parsing an upstream HTTP/1.1 response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("unsupported status code {0}")]
    UnsupportedStatus(u16),

    #[error("malformed chunked body")]
    BadChunk,
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// The body is a [`Bytes`] buffer, so cloning a response (for example to keep
/// one copy in a cache and hand the other to the client) does not copy it.
///
/// # Examples
///
/// ```
/// use swcache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Maximum number of headers accepted from an upstream response.
    const MAX_HEADERS: usize = 96;

    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Reassembles a response from stored parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            keep_alive: true,
        }
    }

    /// Builds a response with a JSON body and `Content-Type: application/json`.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::new(status)
            .header("Content-Type", "application/json")
            .body(value.to_string())
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place, for callers that decorate a response they
    /// received from elsewhere without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body.
    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` when the status is in the `2xx` range.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Parses a complete upstream response held in `buf`, sent in reply to a
    /// request with `request_method`.
    ///
    /// Replies to `HEAD` and `1xx`, `204` and `304` responses carry no body,
    /// whatever their headers declare. Otherwise the body is taken from
    /// `Content-Length` when present, decoded when the response is
    /// `Transfer-Encoding: chunked`, and otherwise runs to the end of the
    /// buffer (the upstream closed the connection). Hop-by-hop headers are
    /// dropped so the response can be stored and re-served as-is.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — the headers or the declared body are truncated.
    /// - [`ResponseError::Parse`] — the status line or headers are malformed.
    /// - [`ResponseError::UnsupportedStatus`] — the status code is outside `100..=599`.
    /// - [`ResponseError::BadChunk`] — the chunked framing is malformed.
    pub fn parse(buf: &[u8], request_method: &Method) -> Result<Self, ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let code = raw.code.ok_or(ResponseError::Incomplete)?;
        let status = StatusCode::from_u16(code).ok_or(ResponseError::UnsupportedStatus(code))?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value.trim());
            }
        }

        let rest = &buf[body_offset..];
        let chunked = header_map
            .get("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));

        let bodiless = *request_method == Method::Head
            || status.is_informational()
            || matches!(status, StatusCode::NoContent | StatusCode::NotModified);

        let body = if bodiless {
            Bytes::new()
        } else if chunked {
            decode_chunked(rest)?
        } else if let Some(len) = header_map
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
        {
            if rest.len() < len {
                return Err(ResponseError::Incomplete);
            }
            Bytes::copy_from_slice(&rest[..len])
        } else {
            Bytes::copy_from_slice(rest)
        };

        header_map.strip_hop_by_hop();

        Ok(Self::from_parts(status, header_map, body))
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>` (always written).
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        // Headers
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // Content-Length is always the last header before the blank line
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        // Body
        if !self.body.is_empty() {
            buf.put(self.body.as_ref());
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

// Decodes a `Transfer-Encoding: chunked` body. Chunk extensions and trailers are ignored.
fn decode_chunked(mut rest: &[u8]) -> Result<Bytes, ResponseError> {
    let mut out = BytesMut::new();

    loop {
        let line_end = find_crlf(rest).ok_or(ResponseError::Incomplete)?;
        let size_line = std::str::from_utf8(&rest[..line_end]).map_err(|_| ResponseError::BadChunk)?;
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16).map_err(|_| ResponseError::BadChunk)?;
        rest = &rest[line_end + 2..];

        if size == 0 {
            return Ok(out.freeze());
        }
        if rest.len() < size + 2 {
            return Err(ResponseError::Incomplete);
        }
        out.put(&rest[..size]);
        if &rest[size..size + 2] != b"\r\n" {
            return Err(ResponseError::BadChunk);
        }
        rest = &rest[size + 2..];
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn custom_header() {
        let r = Response::new(StatusCode::Ok)
            .header("X-Request-Id", "abc-123")
            .body("ok");
        let s = to_string(r.into_bytes());
        assert!(s.contains("X-Request-Id: abc-123\r\n"));
    }

    #[test]
    fn no_body_no_content_type() {
        let r = Response::new(StatusCode::NoContent);
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::Ok).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn json_sets_content_type() {
        let r = Response::json(
            StatusCode::ServiceUnavailable,
            &serde_json::json!({ "error": "Offline" }),
        );
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
        assert_eq!(r.body_ref().as_ref(), br#"{"error":"Offline"}"#);
        assert!(!r.is_ok());
    }

    #[test]
    fn parse_content_length_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbody";
        let r = Response::parse(raw, &Method::Get).unwrap();
        assert_eq!(r.status(), StatusCode::Ok);
        assert_eq!(r.body_ref().as_ref(), b"body");
        assert_eq!(r.headers().get("content-type"), Some("text/css"));
        assert!(!r.headers().contains("connection"));
        assert!(!r.headers().contains("content-length"));
    }

    #[test]
    fn parse_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\n";
        let r = Response::parse(raw, &Method::Get).unwrap();
        assert_eq!(r.body_ref().as_ref(), b"Wikipedia");
        assert!(!r.headers().contains("transfer-encoding"));
    }

    #[test]
    fn parse_body_until_close() {
        let raw = b"HTTP/1.0 404 Not Found\r\n\r\nmissing";
        let r = Response::parse(raw, &Method::Get).unwrap();
        assert_eq!(r.status(), StatusCode::NotFound);
        assert_eq!(r.body_ref().as_ref(), b"missing");
    }

    #[test]
    fn parse_truncated_body_is_incomplete() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort";
        assert!(matches!(Response::parse(raw, &Method::Get), Err(ResponseError::Incomplete)));
    }

    #[test]
    fn parse_unnamed_status_keeps_code() {
        let raw = b"HTTP/1.1 451 Unavailable For Legal Reasons\r\nContent-Length: 7\r\n\r\nblocked";
        let r = Response::parse(raw, &Method::Post).unwrap();
        assert_eq!(r.status(), StatusCode::Other(451));
        assert_eq!(r.body_ref().as_ref(), b"blocked");
        assert!(to_string(r.into_bytes()).starts_with("HTTP/1.1 451 "));
    }

    #[test]
    fn parse_out_of_range_status() {
        let raw = b"HTTP/1.1 999 Nope\r\nContent-Length: 0\r\n\r\n";
        assert!(matches!(
            Response::parse(raw, &Method::Get),
            Err(ResponseError::UnsupportedStatus(999))
        ));
    }

    #[test]
    fn head_reply_has_no_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\n\r\n";
        let r = Response::parse(raw, &Method::Head).unwrap();
        assert_eq!(r.status(), StatusCode::Ok);
        assert!(r.body_ref().is_empty());
        assert_eq!(r.headers().get("content-type"), Some("text/html"));
    }

    #[test]
    fn not_modified_ignores_declared_length() {
        let raw = b"HTTP/1.1 304 Not Modified\r\nContent-Length: 120\r\nETag: \"v1\"\r\n\r\n";
        let r = Response::parse(raw, &Method::Get).unwrap();
        assert_eq!(r.status(), StatusCode::NotModified);
        assert!(r.body_ref().is_empty());
    }

    #[test]
    fn parse_bad_chunk_size() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nab\r\n0\r\n\r\n";
        assert!(matches!(Response::parse(raw, &Method::Get), Err(ResponseError::BadChunk)));
    }
}
