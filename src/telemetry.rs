//! Fire-and-forget request telemetry for uploads.
//!
//! Events are built from a copy of the request head before the body is
//! touched. They never carry token material and never delay or fail the
//! request they describe.

use crate::config::GateConfig;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use http::request::Parts;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Tracing target every event is logged on.
pub const TELEMETRY_TARGET: &str = "authgate::telemetry";

/// Per-request metadata reported for each upload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RequestEvent {
    pub method: String,
    /// Request path without the query string.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RequestEvent {
    pub fn from_parts(parts: &Parts, timestamp: DateTime<Utc>) -> Self {
        Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            user_agent: header_str(&parts.headers, "user-agent").map(str::to_owned),
            client_ip: client_ip(&parts.headers),
            timestamp,
        }
    }
}

/// Client address as reported by the edge in front of the gateway.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(ip) = header_str(headers, "cf-connecting-ip") {
        return Some(ip.trim().to_string());
    }
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
}

#[derive(Debug)]
struct Sink {
    client: reqwest::Client,
    endpoint: Url,
}

/// Emits [`RequestEvent`]s to the log and, optionally, a remote collector.
#[derive(Debug, Clone, Default)]
pub struct TelemetryReporter {
    enabled: bool,
    sink: Option<Arc<Sink>>,
}

impl TelemetryReporter {
    pub fn new(config: &GateConfig) -> Self {
        if !config.telemetry_enabled {
            return Self::disabled();
        }

        let sink = config.telemetry_endpoint.as_ref().and_then(|endpoint| {
            match reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
            {
                Ok(client) => Some(Arc::new(Sink {
                    client,
                    endpoint: endpoint.clone(),
                })),
                Err(e) => {
                    debug!(error = %e, "Telemetry client unavailable, logging only");
                    None
                }
            }
        });

        Self {
            enabled: true,
            sink,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record `event`. Returns immediately; delivery happens in the background.
    pub fn report(&self, event: RequestEvent) {
        if !self.enabled {
            return;
        }

        info!(
            target: TELEMETRY_TARGET,
            method = %event.method,
            path = %event.path,
            user_agent = event.user_agent.as_deref().unwrap_or(""),
            client_ip = event.client_ip.as_deref().unwrap_or(""),
            timestamp = %event.timestamp.to_rfc3339(),
            "Upload request"
        );

        let Some(sink) = self.sink.clone() else {
            return;
        };
        // Outside a runtime there is nothing to spawn onto; the log line stands.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            match sink.client.post(sink.endpoint.clone()).json(&event).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    debug!(target: TELEMETRY_TARGET, status = %resp.status(), "Telemetry collector refused event");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(target: TELEMETRY_TARGET, error = %e, "Telemetry delivery failed");
                }
            }
        });
    }
}
