//! Upstream response descriptor and JSON re-encoding.
//!
//! The forwarder hands back a [`RelayedResponse`] rather than a raw
//! `hyper::Response` so the status line, headers and body can be inspected
//! or substituted before the reply is written to the client.

use crate::error::{ProxyError, ProxyResult};
use crate::proxy_body::{UnifiedBody, full_body};
use crate::proxy_service::is_hop_by_hop_header;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::ext::ReasonPhrase;
use tracing::{debug, warn};

/// A response received from upstream, ready to be relayed.
pub struct RelayedResponse {
    pub status: StatusCode,
    /// Non-canonical reason phrase sent by upstream, if any.
    pub reason: Option<ReasonPhrase>,
    pub headers: HeaderMap,
    pub body: UnifiedBody,
}

impl std::fmt::Debug for RelayedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayedResponse")
            .field("status", &self.status)
            .field("reason", &self.reason_phrase())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl RelayedResponse {
    /// Take over an upstream response.
    ///
    /// JSON payloads are buffered (at most `resp_buffer_max` bytes) and
    /// re-serialized; everything else streams through untouched.
    pub async fn from_upstream<B>(resp: Response<B>, resp_buffer_max: usize) -> ProxyResult<Self>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (mut parts, body) = resp.into_parts();
        let reason = parts.extensions.remove::<ReasonPhrase>();
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        if !is_json(&headers) {
            let body = body
                .map_err(|e| {
                    let e: Box<dyn std::error::Error + Send + Sync> = e.into();
                    ProxyError::UpstreamBody(e.to_string())
                })
                .boxed();
            return Ok(Self {
                status: parts.status,
                reason,
                headers,
                body,
            });
        }

        let raw = match Limited::new(body, resp_buffer_max).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                warn!(
                    limit = resp_buffer_max,
                    "Upstream JSON response exceeds relay buffer"
                );
                return Err(ProxyError::ResponseTooLarge {
                    limit: resp_buffer_max,
                });
            }
            Err(e) => return Err(ProxyError::UpstreamBody(e.to_string())),
        };

        let payload = reencode_json(raw);
        headers.remove(header::TRANSFER_ENCODING);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(payload.len()));

        Ok(Self {
            status: parts.status,
            reason,
            headers,
            body: full_body(payload),
        })
    }

    /// Status text as it will be written on the wire.
    pub fn reason_phrase(&self) -> Option<&str> {
        match &self.reason {
            Some(reason) => std::str::from_utf8(reason.as_bytes()).ok(),
            None => self.status.canonical_reason(),
        }
    }

    /// Build the client-facing response.
    pub fn into_response(self) -> Response<UnifiedBody> {
        let mut resp = Response::new(self.body);
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;
        if let Some(reason) = self.reason {
            resp.extensions_mut().insert(reason);
        }
        resp
    }
}

/// Parse and compactly re-serialize a JSON payload.
///
/// Payloads that are not valid JSON are returned as-is.
pub fn reencode_json(raw: Bytes) -> Bytes {
    match serde_json::from_slice::<serde_json::Value>(&raw) {
        Ok(value) => match serde_json::to_vec(&value) {
            Ok(encoded) => Bytes::from(encoded),
            Err(_) => raw,
        },
        Err(e) => {
            debug!(error = %e, size = raw.len(), "Upstream JSON did not parse, relaying raw");
            raw
        }
    }
}

/// `application/json` or any `+json` media type.
pub fn is_json(headers: &HeaderMap) -> bool {
    let Some(value) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let essence = value.split(';').next().unwrap_or("").trim();
    essence.eq_ignore_ascii_case("application/json")
        || essence
            .rsplit_once('+')
            .is_some_and(|(_, suffix)| suffix.eq_ignore_ascii_case("json"))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let hop: Vec<_> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()))
        .cloned()
        .collect();
    for name in hop {
        headers.remove(name);
    }
}
