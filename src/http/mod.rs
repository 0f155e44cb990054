//! HTTP/1.1 protocol types and parsing.
//!
//! This module provides the core HTTP primitives:
//! [`Method`], [`StatusCode`], [`Headers`], [`Request`], and [`Response`].
//! Requests and responses travel in both directions: parsed from clients and
//! upstream origins, and serialized back onto the wire.

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

/// An HTTP response status code.
///
/// # Examples
///
/// ```
/// use swcache::http::StatusCode;
///
/// let status = StatusCode::Ok;
/// assert_eq!(status.as_u16(), 200);
/// assert_eq!(status.canonical_reason(), "OK");
/// assert!(status.is_success());
///
/// let teapot = StatusCode::from_u16(418).unwrap();
/// assert_eq!(teapot.as_u16(), 418);
/// assert!(teapot.is_client_error());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    // 1xx Informational
    Continue,
    SwitchingProtocols,

    // 2xx Success
    Ok,
    Created,
    Accepted,
    NoContent,
    PartialContent,

    // 3xx Redirection
    MovedPermanently,
    Found,
    SeeOther,
    NotModified,
    TemporaryRedirect,
    PermanentRedirect,

    // 4xx Client Error
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    Gone,
    LengthRequired,
    PayloadTooLarge,
    UriTooLong,
    UnsupportedMediaType,
    UnprocessableEntity,
    TooManyRequests,

    // 5xx Server Error
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,

    /// Any other code in `100..=599`, kept verbatim.
    ///
    /// Built by [`StatusCode::from_u16`] only for codes without a named variant.
    Other(u16),
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Continue => 100,
            Self::SwitchingProtocols => 101,
            Self::Ok => 200,
            Self::Created => 201,
            Self::Accepted => 202,
            Self::NoContent => 204,
            Self::PartialContent => 206,
            Self::MovedPermanently => 301,
            Self::Found => 302,
            Self::SeeOther => 303,
            Self::NotModified => 304,
            Self::TemporaryRedirect => 307,
            Self::PermanentRedirect => 308,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::Conflict => 409,
            Self::Gone => 410,
            Self::LengthRequired => 411,
            Self::PayloadTooLarge => 413,
            Self::UriTooLong => 414,
            Self::UnsupportedMediaType => 415,
            Self::UnprocessableEntity => 422,
            Self::TooManyRequests => 429,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
            Self::BadGateway => 502,
            Self::ServiceUnavailable => 503,
            Self::GatewayTimeout => 504,
            Self::HttpVersionNotSupported => 505,
            Self::Other(code) => code,
        }
    }

    /// Looks up a status code by its numeric value.
    ///
    /// Codes without a named variant become [`StatusCode::Other`]. Returns
    /// `None` only outside `100..=599`.
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            100 => Self::Continue,
            101 => Self::SwitchingProtocols,
            200 => Self::Ok,
            201 => Self::Created,
            202 => Self::Accepted,
            204 => Self::NoContent,
            206 => Self::PartialContent,
            301 => Self::MovedPermanently,
            302 => Self::Found,
            303 => Self::SeeOther,
            304 => Self::NotModified,
            307 => Self::TemporaryRedirect,
            308 => Self::PermanentRedirect,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            409 => Self::Conflict,
            410 => Self::Gone,
            411 => Self::LengthRequired,
            413 => Self::PayloadTooLarge,
            414 => Self::UriTooLong,
            415 => Self::UnsupportedMediaType,
            422 => Self::UnprocessableEntity,
            429 => Self::TooManyRequests,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            505 => Self::HttpVersionNotSupported,
            100..=599 => Self::Other(code),
            _ => return None,
        })
    }

    /// Returns `true` for `1xx` codes.
    pub fn is_informational(self) -> bool {
        (100..200).contains(&self.as_u16())
    }

    /// Returns `true` for `2xx` codes, the "ok" range that is eligible for caching.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// Returns `true` for `4xx` codes.
    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.as_u16())
    }

    /// Returns the canonical reason phrase for this status code.
    ///
    /// [`StatusCode::Other`] falls back to the name of its class.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Continue => "Continue",
            Self::SwitchingProtocols => "Switching Protocols",
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::Accepted => "Accepted",
            Self::NoContent => "No Content",
            Self::PartialContent => "Partial Content",
            Self::MovedPermanently => "Moved Permanently",
            Self::Found => "Found",
            Self::SeeOther => "See Other",
            Self::NotModified => "Not Modified",
            Self::TemporaryRedirect => "Temporary Redirect",
            Self::PermanentRedirect => "Permanent Redirect",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::Conflict => "Conflict",
            Self::Gone => "Gone",
            Self::LengthRequired => "Length Required",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::UriTooLong => "URI Too Long",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::UnprocessableEntity => "Unprocessable Entity",
            Self::TooManyRequests => "Too Many Requests",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
            Self::HttpVersionNotSupported => "HTTP Version Not Supported",
            Self::Other(code) => match code / 100 {
                1 => "Informational",
                2 => "Success",
                3 => "Redirection",
                4 => "Client Error",
                _ => "Server Error",
            },
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// Standard methods are represented as unit variants for zero-cost comparison.
/// Non-standard methods are captured in the `Custom` variant.
///
/// # Examples
///
/// ```
/// use swcache::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
/// assert!(method.is_safe());
/// assert!(method.is_idempotent());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET — retrieve a representation of the target resource.
    Get,
    /// POST — perform resource-specific processing on the request payload.
    Post,
    /// PUT — replace the target resource's current representation.
    Put,
    /// DELETE — remove the association between the target resource and its functionality.
    Delete,
    /// HEAD — identical to GET but without a response body.
    Head,
    /// OPTIONS — describe the communication options for the target resource.
    Options,
    /// PATCH — apply partial modifications to a resource.
    Patch,
    /// CONNECT — establish a tunnel to the server identified by the target resource.
    Connect,
    /// TRACE — perform a message loop-back test along the path to the target resource.
    Trace,
    /// A non-standard extension method.
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Returns `true` if this method is considered "safe" (no side effects per RFC 9110 §9.2.1).
    ///
    /// Safe methods: GET, HEAD, OPTIONS, TRACE.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options | Self::Trace)
    }

    /// Returns `true` if this method is idempotent (RFC 9110 §9.2.2).
    ///
    /// Idempotent methods: GET, HEAD, PUT, DELETE, OPTIONS, TRACE.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Self::Get | Self::Head | Self::Put | Self::Delete | Self::Options | Self::Trace
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            other => Self::Custom(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
