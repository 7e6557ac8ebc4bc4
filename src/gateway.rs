//! The gateway service: routing plus the two gated endpoints.
//!
//! | Path      | Method | Behaviour                                        |
//! |-----------|--------|--------------------------------------------------|
//! | `/check`  | POST   | Gate only; 200 with an empty body when allowed.  |
//! | `/upload` | POST   | Gate, report telemetry, forward, relay.          |
//!
//! Other methods on these paths get 405, anything else 404. Neither runs the
//! gate.

use crate::auth::{RequestGate, UNAUTHORIZED_REASON, unauthorized_response};
use crate::config::GateConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::proxy_body::{UnifiedBody, empty_body, full_body};
use crate::proxy_service::ForwardingProxy;
use crate::telemetry::{RequestEvent, TelemetryReporter};
use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::Service;
use tracing::debug;

/// Endpoints served by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Check,
    Upload,
}

impl Route {
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/check" => Some(Route::Check),
            "/upload" => Some(Route::Upload),
            _ => None,
        }
    }
}

/// Gate, forwarder and telemetry composed into one `tower::Service`.
#[derive(Clone, Debug)]
pub struct GatewayService {
    gate: RequestGate,
    proxy: Arc<ForwardingProxy>,
    telemetry: TelemetryReporter,
}

impl GatewayService {
    /// Build the service from start-up configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Connection` if the upstream client cannot be built.
    pub fn new(config: &GateConfig) -> ProxyResult<Self> {
        Ok(Self {
            gate: RequestGate::new(config.auth.clone()),
            proxy: Arc::new(ForwardingProxy::new(config)?),
            telemetry: TelemetryReporter::new(config),
        })
    }

    /// Replace the gate, e.g. to inject a frozen clock.
    pub fn with_gate(mut self, gate: RequestGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryReporter) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    /// Handle a single request.
    ///
    /// Rejections, 404 and 405 are ordinary responses. `Err` is reserved for
    /// failures talking to upstream.
    pub async fn handle_request<B>(&self, req: Request<B>) -> ProxyResult<Response<UnifiedBody>>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some(route) = Route::from_path(req.uri().path()) else {
            debug!(path = %req.uri().path(), "No route");
            return Ok(not_found());
        };
        if req.method() != Method::POST {
            debug!(method = %req.method(), ?route, "Method not allowed");
            return Ok(method_not_allowed());
        }

        if !self.gate.check(&req).is_authorized() {
            return Ok(unauthorized_response(UNAUTHORIZED_REASON));
        }

        match route {
            Route::Check => Ok(Response::new(empty_body())),
            Route::Upload => {
                let (parts, body) = req.into_parts();
                self.telemetry
                    .report(RequestEvent::from_parts(&parts, chrono::Utc::now()));
                let relayed = self.proxy.forward(&parts, body).await?;
                Ok(relayed.into_response())
            }
        }
    }
}

impl<B> Service<Request<B>> for GatewayService
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<UnifiedBody>;
    type Error = ProxyError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.handle_request(req).await })
    }
}

/// Convert a service error into the response written to the client.
pub fn error_response(err: &ProxyError) -> Response<UnifiedBody> {
    // Full<Bytes> has Infallible error - convert using absurd pattern
    err.to_response()
        .map(|body| body.map_err(|e| match e {}).boxed())
}

fn not_found() -> Response<UnifiedBody> {
    plain(StatusCode::NOT_FOUND, "404 Not Found")
}

fn method_not_allowed() -> Response<UnifiedBody> {
    let mut resp = plain(StatusCode::METHOD_NOT_ALLOWED, "405 Method Not Allowed");
    resp.headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST"));
    resp
}

fn plain(status: StatusCode, body: &'static str) -> Response<UnifiedBody> {
    let mut resp = Response::new(full_body(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain;charset=UTF-8"),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthMode, encode_token};
    use crate::clock::FixedClock;
    use http_body_util::Full;

    const NOW: i64 = 1_700_000_000_000;

    fn service(secret: Option<&str>) -> GatewayService {
        let mut config = GateConfig::default();
        config.auth = AuthMode::from_value(secret);
        // Nothing listens here; only reached by tests that expect a transport error.
        config.upstream = url::Url::parse("http://127.0.0.1:1").unwrap();
        config.telemetry_enabled = false;
        let gate = RequestGate::with_clock(config.auth.clone(), Arc::new(FixedClock::new(NOW)));
        GatewayService::new(&config).unwrap().with_gate(gate)
    }

    fn request(method: Method, uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn with_token(path: &str, token: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
        format!("{path}?authCode={encoded}")
    }

    #[test]
    fn test_routes() {
        assert_eq!(Route::from_path("/check"), Some(Route::Check));
        assert_eq!(Route::from_path("/upload"), Some(Route::Upload));
        assert_eq!(Route::from_path("/upload/"), None);
        assert_eq!(Route::from_path("/"), None);
    }

    #[tokio::test]
    async fn test_check_with_valid_token_is_empty_200() {
        let svc = service(Some("mysecret"));
        let uri = with_token("/check", &encode_token("mysecret", NOW));
        let resp = svc.handle_request(request(Method::POST, &uri)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_check_with_wrong_token_is_401() {
        let svc = service(Some("mysecret"));
        let uri = with_token("/check", &encode_token("wrong", NOW));
        let resp = svc.handle_request(request(Method::POST, &uri)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get(header::CONTENT_LENGTH).unwrap(), "5");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"error");
    }

    #[tokio::test]
    async fn test_upload_rejected_before_forwarding() {
        // Upstream is unreachable; a 401 proves forwarding was never attempted.
        let svc = service(Some("mysecret"));
        let resp = svc
            .handle_request(request(Method::POST, "/upload"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_check_open_when_auth_disabled() {
        let svc = service(None);
        let resp = svc
            .handle_request(request(Method::POST, "/check"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_wrong_method_is_405_without_gate() {
        let svc = service(Some("mysecret"));
        let resp = svc
            .handle_request(request(Method::GET, "/check"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers().get(header::ALLOW).unwrap(), "POST");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let svc = service(Some("mysecret"));
        let resp = svc
            .handle_request(request(Method::POST, "/nope"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let svc = service(None);
        let err = svc
            .handle_request(request(Method::POST, "/upload"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::ConnectionRefused(_) | ProxyError::Connection(_)
        ));
        assert_eq!(error_response(&err).status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_service_trait_call() {
        let mut svc = service(None);
        let resp = Service::call(&mut svc, request(Method::POST, "/check"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
