//! Mock upstream content host for integration testing.
//!
//! Records every request it receives and answers with a preconfigured
//! status, content type and body.

#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A request as seen by the mock upstream.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Path and query, exactly as received.
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Configurable mock upstream.
#[derive(Debug, Clone)]
pub struct MockUpstream {
    status: StatusCode,
    content_type: String,
    body: Bytes,
    extra_headers: Vec<(String, String)>,
}

#[derive(Debug)]
struct MockState {
    config: MockUpstream,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockUpstream {
    /// A mock that answers `200` with a small JSON document.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json".to_string(),
            body: Bytes::from_static(br#"[{ "src" : "/file/abc.jpg" }]"#),
            extra_headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_body(mut self, content_type: &str, body: &'static str) -> Self {
        self.content_type = content_type.to_string();
        self.body = Bytes::from_static(body.as_bytes());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Start the mock server and return its address and handle.
    pub async fn start(self) -> (SocketAddr, MockServerHandle) {
        let state = Arc::new(MockState {
            config: self,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (
            addr,
            MockServerHandle {
                state,
                _handle: handle,
            },
        )
    }
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the running mock server.
pub struct MockServerHandle {
    state: Arc<MockState>,
    _handle: JoinHandle<()>,
}

impl MockServerHandle {
    pub async fn request_count(&self) -> usize {
        self.state.requests.lock().await.len()
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().await.clone()
    }

    pub async fn last_request(&self) -> Option<RecordedRequest> {
        self.state.requests.lock().await.last().cloned()
    }

    /// Wait until a request for `path` arrives, or give up after `timeout`.
    pub async fn wait_for_path(&self, path: &str, timeout: Duration) -> Option<RecordedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let found = self
                .state
                .requests
                .lock()
                .await
                .iter()
                .find(|r| r.uri.split('?').next() == Some(path))
                .cloned();
            if found.is_some() || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn record(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let uri = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    state.requests.lock().await.push(RecordedRequest {
        method,
        uri,
        headers,
        body,
    });

    let config = &state.config;
    let mut builder = Response::builder()
        .status(config.status)
        .header(header::CONTENT_TYPE, config.content_type.as_str());
    for (name, value) in &config.extra_headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Body::from(config.body.clone())).unwrap()
}
