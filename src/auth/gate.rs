//! The request gate: resolve, validate, then reject or let through.

use super::resolver::{TokenSource, resolve_from_parts};
use super::{AuthMode, token};
use crate::clock::{Clock, SystemClock};
use crate::proxy_body::{UnifiedBody, full_body};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Uri, header};
use std::sync::Arc;
use tracing::{debug, info};

/// Reason string sent in the body of every 401.
///
/// Deliberately the same for expired, mismatched and missing tokens.
pub const UNAUTHORIZED_REASON: &str = "error";

/// Outcome of running the gate on one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Auth is disabled; no token was looked at.
    Open,
    /// A valid token was found at `source`.
    Authorized { source: TokenSource },
    /// Missing or invalid token.
    Rejected,
}

impl GateDecision {
    pub fn is_authorized(&self) -> bool {
        !matches!(self, GateDecision::Rejected)
    }
}

/// Resolve + validate composed over a fixed auth mode and clock.
#[derive(Clone)]
pub struct RequestGate {
    mode: AuthMode,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl RequestGate {
    pub fn new(mode: AuthMode) -> Self {
        Self::with_clock(mode, Arc::new(SystemClock))
    }

    pub fn with_clock(mode: AuthMode, clock: Arc<dyn Clock>) -> Self {
        Self { mode, clock }
    }

    pub fn mode(&self) -> &AuthMode {
        &self.mode
    }

    /// Decide whether `req` may proceed.
    pub fn check<B>(&self, req: &Request<B>) -> GateDecision {
        self.check_parts(req.uri(), req.headers())
    }

    /// Same as [`check`](Self::check), on the request head only.
    pub fn check_parts(&self, uri: &Uri, headers: &HeaderMap) -> GateDecision {
        let secret = match &self.mode {
            AuthMode::Disabled => return GateDecision::Open,
            AuthMode::Enforced(secret) => secret,
        };

        let Some(candidate) = resolve_from_parts(uri, headers) else {
            info!(reason = %token::TokenError::Missing, "Rejected request: no token");
            return GateDecision::Rejected;
        };

        match token::verify(secret, Some(&candidate.value), self.clock.now_millis()) {
            Ok(()) => {
                debug!(source = %candidate.source, "Token accepted");
                GateDecision::Authorized {
                    source: candidate.source,
                }
            }
            Err(reason) => {
                info!(
                    reason = %reason,
                    source = %candidate.source,
                    "Rejected request: invalid token"
                );
                GateDecision::Rejected
            }
        }
    }
}

/// Build the 401 returned for rejected requests.
///
/// `Content-Length` is set explicitly so HEAD-style clients see the size.
pub fn unauthorized_response(reason: &'static str) -> Response<UnifiedBody> {
    let mut resp = Response::new(full_body(reason));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;

    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain;charset=UTF-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(reason.len()));
    resp
}
