//! Tower layer for structured request/response logging.
//!
//! Uses `tower_http::trace::TraceLayer` for the middleware plumbing, with
//! custom callbacks that keep token material out of the logs: sensitive
//! headers are redacted and the `authCode` query parameter is masked in
//! every logged URI.

use crate::auth::AUTH_PARAM;
use http::{HeaderMap, HeaderValue, Uri};
use std::fmt;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Headers that are redacted from logs.
///
/// `referer` is included because it may carry the token in its query.
const SENSITIVE_HEADERS: &[&str] = &[
    "authcode",
    "authorization",
    "cookie",
    "proxy-authorization",
    "referer",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
];

const REDACTED: &str = "[REDACTED]";

/// Create the logging/tracing layer using `tower-http`.
pub fn logging_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    CorrelationMakeSpan,
    OnRequestLogger,
    OnResponseLogger,
    tower_http::trace::DefaultOnBodyChunk,
    tower_http::trace::DefaultOnEos,
    OnFailureLogger,
> {
    TraceLayer::new_for_http()
        .make_span_with(CorrelationMakeSpan)
        .on_request(OnRequestLogger)
        .on_response(OnResponseLogger)
        .on_failure(OnFailureLogger)
}

/// Span creator that attaches a correlation ID to every request span.
///
/// Uses `x-request-id` when the caller sent one, otherwise a fresh UUID v4.
#[derive(Clone, Debug)]
pub struct CorrelationMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for CorrelationMakeSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %RedactedUri(request.uri()),
            version = ?request.version(),
            request_id = %request_id,
        )
    }
}

#[derive(Clone, Debug)]
pub struct OnRequestLogger;

impl<B> tower_http::trace::OnRequest<B> for OnRequestLogger {
    fn on_request(&mut self, request: &http::Request<B>, _span: &tracing::Span) {
        info!(
            method = %request.method(),
            uri = %RedactedUri(request.uri()),
            direction = "inbound",
            "Request received"
        );

        // Header formatting only pays off at DEBUG
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                version = ?request.version(),
                headers = ?sanitize_headers(request.headers()),
                "Request details"
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnResponseLogger;

impl<B> tower_http::trace::OnResponse<B> for OnResponseLogger {
    fn on_response(
        self,
        response: &http::Response<B>,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        info!(
            status = %response.status().as_u16(),
            latency_ms = latency.as_millis(),
            direction = "outbound",
            "Response sent"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                version = ?response.version(),
                headers = ?sanitize_headers(response.headers()),
                "Response details"
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnFailureLogger;

impl tower_http::trace::OnFailure<tower_http::classify::ServerErrorsFailureClass>
    for OnFailureLogger
{
    fn on_failure(
        &mut self,
        failure: tower_http::classify::ServerErrorsFailureClass,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis(),
            direction = "error",
            "Request failed"
        );
    }
}

// ============================================================================
// Redaction
// ============================================================================

/// Displays a URI with the value of every `authCode` parameter masked.
pub struct RedactedUri<'a>(pub &'a Uri);

impl fmt::Display for RedactedUri<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uri = self.0;
        let Some(query) = uri.query() else {
            return fmt::Display::fmt(uri, f);
        };

        if let (Some(scheme), Some(authority)) = (uri.scheme(), uri.authority()) {
            write!(f, "{scheme}://{authority}")?;
        }
        f.write_str(uri.path())?;
        f.write_str("?")?;

        for (idx, pair) in query.split('&').enumerate() {
            if idx > 0 {
                f.write_str("&")?;
            }
            let name = pair.split_once('=').map_or(pair, |(name, _)| name);
            if is_auth_param(name) {
                write!(f, "{name}={REDACTED}")?;
            } else {
                f.write_str(pair)?;
            }
        }
        Ok(())
    }
}

fn is_auth_param(raw_name: &str) -> bool {
    // Names are compared after form decoding so `auth%43ode` is caught too.
    url::form_urlencoded::parse(raw_name.as_bytes())
        .next()
        .is_some_and(|(name, _)| name == AUTH_PARAM)
}

/// Logged header values are cut off after this many bytes.
const MAX_VALUE_LEN: usize = 1024;

/// Only the first this-many headers are rendered.
const MAX_HEADERS_TO_LOG: usize = 50;

/// `Debug` view of a header map with credentials masked.
pub struct SanitizedHeaders<'a>(&'a HeaderMap);

impl fmt::Debug for SanitizedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.0.iter().take(MAX_HEADERS_TO_LOG) {
            map.entry(&name.as_str(), &render_value(name.as_str(), value));
        }
        let skipped = self.0.len().saturating_sub(MAX_HEADERS_TO_LOG);
        if skipped > 0 {
            map.entry(&"...", &format!("({skipped} more headers)"));
        }
        map.finish()
    }
}

fn render_value(name: &str, value: &HeaderValue) -> String {
    if SENSITIVE_HEADERS.iter().any(|s| name.eq_ignore_ascii_case(s)) {
        return REDACTED.to_string();
    }
    match value.to_str() {
        Ok(text) if text.len() > MAX_VALUE_LEN => {
            format!("{}... ({} bytes)", &text[..MAX_VALUE_LEN], text.len())
        }
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary: {} bytes>", value.len()),
    }
}

pub fn sanitize_headers(headers: &HeaderMap) -> SanitizedHeaders<'_> {
    SanitizedHeaders(headers)
}
