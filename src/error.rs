//! Error types for the authgate proxy layer.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode, header};
use thiserror::Error;

/// Errors that can occur while forwarding a request or relaying the reply.
///
/// Token rejections are not errors: the gate answers those with a regular
/// 401 response.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Invalid URI or target
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Connection error to upstream (maps to 502 Bad Gateway)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection refused by upstream (maps to 502 Bad Gateway)
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Timeout reported by the transport (maps to 504 Gateway Timeout)
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Client disconnected (should close upstream immediately)
    #[error("Client disconnected")]
    ClientDisconnect,

    /// Upstream body failed mid-stream (maps to 502 Bad Gateway)
    #[error("Upstream body error: {0}")]
    UpstreamBody(String),

    /// Upstream JSON body exceeded the relay buffer (maps to 502 Bad Gateway)
    #[error("Upstream response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },
}

impl ProxyError {
    /// Convert error to HTTP response with appropriate status code.
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let (status, message) = match self {
            ProxyError::ConnectionRefused(_) | ProxyError::Connection(_) => (
                StatusCode::BAD_GATEWAY,
                "502 Bad Gateway\n\nFailed to connect to upstream server.",
            ),
            ProxyError::UpstreamBody(_) | ProxyError::ResponseTooLarge { .. } => (
                StatusCode::BAD_GATEWAY,
                "502 Bad Gateway\n\nInvalid response from upstream server.",
            ),
            ProxyError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "504 Gateway Timeout\n\nUpstream server did not respond in time.",
            ),
            ProxyError::InvalidUri(_) => (
                StatusCode::BAD_REQUEST,
                "400 Bad Request\n\nInvalid request URI.",
            ),
            ProxyError::ClientDisconnect => (
                StatusCode::BAD_REQUEST,
                "400 Bad Request\n\nClient disconnected.",
            ),
        };

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::CACHE_CONTROL, "no-store")
            .body(Full::new(Bytes::from(message)))
            .unwrap_or_else(|_| {
                let mut resp = Response::new(Full::new(Bytes::from("500 Internal Server Error")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                resp
            })
    }
}

/// Result type alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Start-up configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The upstream origin could not be parsed as an absolute URL.
    #[error("invalid upstream URL '{url}': {message}")]
    InvalidUpstream { url: String, message: String },

    /// The upstream origin uses a scheme the client cannot speak.
    #[error("unsupported upstream scheme '{scheme}' (expected http or https)")]
    UnsupportedScheme { scheme: String },

    /// The telemetry endpoint could not be parsed.
    #[error("invalid telemetry endpoint '{url}': {message}")]
    InvalidTelemetryEndpoint { url: String, message: String },

    /// The upstream client could not be built.
    #[error("failed to build upstream client: {0}")]
    Client(String),
}
