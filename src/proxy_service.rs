//! Forwarding of authorized requests to the upstream content host.
//!
//! # Request Flow
//!
//! ```text
//! (Parts, body) ──► build_target() ──► forwarded_headers()
//!                                             │
//!                                             ▼
//!                         Client::request() (hyper-rustls, pooled)
//!                                             │
//!                          ┌──────────────────┴──────────────────┐
//!                          ▼                                     ▼
//!              RelayedResponse::from_upstream()           map_hyper_error()
//!                                                       (502 / 504 to client)
//! ```
//!
//! The inbound request head is only ever borrowed. The body is handed to the
//! upstream client as-is and never buffered.

use crate::auth::AUTH_PARAM;
use crate::config::GateConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::proxy_body::{ClientBody, client_body};
use crate::relay::RelayedResponse;
use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, HeaderName, Request, Uri, header};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Header carrying the token, in the lowercase form `HeaderMap` stores.
const AUTH_HEADER: HeaderName = HeaderName::from_static("authcode");

/// Forwards requests to a fixed upstream origin over HTTP or HTTPS.
#[derive(Clone)]
pub struct ForwardingProxy {
    /// HTTPS-capable client for upstream connections with streaming support.
    client: Client<HttpsConnector<HttpConnector>, ClientBody>,
    upstream: Url,
    resp_buffer_max: usize,
}

impl std::fmt::Debug for ForwardingProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingProxy")
            .field("upstream", &self.upstream.as_str())
            .field("resp_buffer_max", &self.resp_buffer_max)
            .finish_non_exhaustive()
    }
}

impl ForwardingProxy {
    /// Create a forwarder for `config.upstream`.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Connection` if the TLS crypto provider cannot be
    /// installed.
    pub fn new(config: &GateConfig) -> ProxyResult<Self> {
        // Install default crypto provider for rustls exactly once; the outcome
        // is captured so a second proxy in the same process sees the same result.
        static RUSTLS_INIT: std::sync::OnceLock<Result<(), ()>> = std::sync::OnceLock::new();
        let init_result = RUSTLS_INIT.get_or_init(|| {
            if rustls::crypto::CryptoProvider::get_default().is_some() {
                return Ok(());
            }
            rustls::crypto::ring::default_provider()
                .install_default()
                .map_err(|_| ())
        });
        if init_result.is_err() {
            return Err(ProxyError::Connection(
                "Failed to install rustls crypto provider".into(),
            ));
        }

        let mut http_connector = HttpConnector::new();
        http_connector.set_nodelay(config.tcp_nodelay);
        http_connector.enforce_http(false);

        // Hosts without a system trust store fall back to the bundled Mozilla roots.
        let builder = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                warn!(error = %e, "Native TLS roots unavailable, using bundled webpki roots");
                HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let https_connector = builder
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .http2_keep_alive_while_idle(true)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .build(https_connector);

        Ok(Self {
            client,
            upstream: config.upstream.clone(),
            resp_buffer_max: config.resp_buffer_max,
        })
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Forward a request described by `parts` with `body` and relay the reply.
    ///
    /// Upstream 4xx/5xx statuses are successful relays; only transport
    /// failures come back as `Err`.
    pub async fn forward<B>(&self, parts: &Parts, body: B) -> ProxyResult<RelayedResponse>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let target = build_target(&self.upstream, &parts.uri)?;

        info!(
            method = %parts.method,
            path = %parts.uri.path(),
            target = %target,
            "Forwarding request"
        );

        let mut upstream_req = Request::builder().method(parts.method.clone()).uri(target);
        let headers = upstream_req.headers_mut().ok_or_else(|| {
            error!("Failed to get mutable headers from request builder");
            ProxyError::Connection("Request builder in invalid state".to_string())
        })?;
        *headers = forwarded_headers(&parts.headers);

        let upstream_req = upstream_req.body(client_body(body)).map_err(|e| {
            error!(error = %e, "Failed to build upstream request");
            ProxyError::Connection(format!("Failed to build request: {}", e))
        })?;

        let upstream_res = self
            .client
            .request(upstream_req)
            .await
            .map_err(map_hyper_error)?;

        debug!(status = %upstream_res.status(), "Upstream responded");

        RelayedResponse::from_upstream(upstream_res, self.resp_buffer_max).await
    }
}

/// Rewrite an inbound URI onto the upstream origin.
///
/// The path is kept, the authority replaced, and every query parameter is
/// copied in order except `authCode`.
pub fn build_target(upstream: &Url, uri: &Uri) -> ProxyResult<Uri> {
    let mut target = upstream.clone();
    target.set_path(uri.path());
    target.set_query(None);
    target.set_fragment(None);

    let kept: Vec<(String, String)> = uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .filter(|(name, _)| name != AUTH_PARAM)
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    // An empty pair list would still leave a dangling '?'.
    if !kept.is_empty() {
        target.query_pairs_mut().extend_pairs(kept);
    }

    target
        .as_str()
        .parse()
        .map_err(|e| ProxyError::InvalidUri(format!("Failed to parse upstream URI: {}", e)))
}

/// Copy of the inbound headers suitable for the upstream leg.
///
/// Drops the token header, `Host` (the client derives it from the target)
/// and hop-by-hop headers.
pub fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if *name == AUTH_HEADER || *name == header::HOST || is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Check if a header is a hop-by-hop header that shouldn't be forwarded.
///
/// `transfer-encoding` is kept so chunked bodies stay chunked.
pub(crate) fn is_hop_by_hop_header(name: &str) -> bool {
    const HOP_BY_HOP: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailer",
        "upgrade",
    ];
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Map hyper_util client errors to appropriate ProxyError variants.
///
/// # Error Mapping
/// - Connection refused -> `ProxyError::ConnectionRefused` (502)
/// - Timeout -> `ProxyError::Timeout` (504)
/// - Other errors -> `ProxyError::Connection` (502)
fn map_hyper_error(e: hyper_util::client::legacy::Error) -> ProxyError {
    // Source chain carries the io error text, the top-level Display does not.
    let mut error_msg = e.to_string().to_lowercase();
    let mut source = std::error::Error::source(&e);
    while let Some(inner) = source {
        error_msg.push_str(": ");
        error_msg.push_str(&inner.to_string().to_lowercase());
        source = inner.source();
    }

    if error_msg.contains("connection refused") {
        warn!(error = %error_msg, "Upstream connection refused");
        return ProxyError::ConnectionRefused(format!("Upstream refused connection: {}", e));
    }

    if error_msg.contains("timeout") || error_msg.contains("timed out") {
        warn!(error = %error_msg, "Upstream timeout");
        return ProxyError::Timeout(format!("Upstream timeout: {}", e));
    }

    if e.is_connect() || error_msg.contains("connection") || error_msg.contains("connect") {
        warn!(error = %error_msg, "Upstream connection failed");
        return ProxyError::Connection(format!("Failed to connect to upstream: {}", e));
    }

    if error_msg.contains("canceled") {
        warn!(error = %error_msg, "Client disconnected");
        return ProxyError::ClientDisconnect;
    }

    warn!(error = %error_msg, "Upstream error");
    ProxyError::Connection(format!("Upstream error: {}", e))
}
