//! In-process authgate server for integration tests.

#![allow(dead_code)]

use authgate::auth::{AuthMode, encode_token};
use authgate::config::GateConfig;
use authgate::gateway::GatewayService;
use authgate::server::{DrainResult, serve};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const SECRET: &str = "mysecret";

/// Configuration pointing at `upstream` with the test secret and telemetry off.
pub fn test_config(upstream: SocketAddr, secret: Option<&str>) -> GateConfig {
    let mut config = GateConfig::default()
        .with_upstream(&format!("http://{upstream}"))
        .unwrap();
    config.auth = AuthMode::from_value(secret);
    config.telemetry_enabled = false;
    config
}

/// A running gateway; shuts down when dropped.
pub struct TestGateway {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<DrainResult>>,
}

impl TestGateway {
    pub async fn start(config: GateConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = GatewayService::new(&config).unwrap();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(serve(
            listener,
            service,
            Arc::new(config),
            shutdown.clone(),
            Duration::from_secs(2),
        ));

        Self {
            addr,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    /// Stop accepting and wait for the drain to finish.
    pub async fn shutdown(mut self) -> DrainResult {
        self.shutdown.cancel();
        self.handle.take().unwrap().await.unwrap()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// HTTP client that ignores proxy settings from the environment.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A token for `code` issued `age_ms` milliseconds ago.
pub fn token(code: &str, age_ms: i64) -> String {
    encode_token(code, now_ms() - age_ms)
}

/// Percent-encode a token for use in a query string.
pub fn query_encode(token: &str) -> String {
    url::form_urlencoded::byte_serialize(token.as_bytes()).collect()
}
