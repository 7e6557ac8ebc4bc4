//! Centralized configuration for the authgate proxy.
//!
//! Everything is read once at start-up and stays immutable for the life of
//! the process. The secret and upstream use the same variable names as the
//! hosted deployment (`AUTH_CODE`, `UPSTREAM_URL`); tuning knobs carry an
//! `AUTHGATE_` prefix.

use crate::auth::AuthMode;
use crate::error::ConfigError;
use url::Url;

/// Upstream content host used when `UPSTREAM_URL` is not set.
pub const DEFAULT_UPSTREAM_URL: &str = "https://telegra.ph";

/// Runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct GateConfig {
    // ─────────────────────────────────────────────────────────────────────────
    // Gate
    // ─────────────────────────────────────────────────────────────────────────
    /// Whether tokens are enforced, and against which secret.
    pub auth: AuthMode,

    /// Origin that authorized uploads are forwarded to.
    pub upstream: Url,

    // ─────────────────────────────────────────────────────────────────────────
    // Network
    // ─────────────────────────────────────────────────────────────────────────
    /// Enable TCP_NODELAY (Nagle's algorithm disabled) on both legs
    pub tcp_nodelay: bool,

    /// TCP keepalive interval in seconds
    pub tcp_keepalive_secs: u64,

    /// Socket buffer size (SO_RCVBUF / SO_SNDBUF)
    pub socket_buffer_size: usize,

    /// Maximum concurrent connections; further connections receive 503
    pub max_concurrent_streams: usize,

    /// Maximum idle connections per host in the upstream pool
    pub pool_max_idle_per_host: usize,

    // ─────────────────────────────────────────────────────────────────────────
    // Relay
    // ─────────────────────────────────────────────────────────────────────────
    /// Maximum upstream JSON body buffered for re-serialization, in bytes.
    /// Larger JSON replies are answered with 502 Bad Gateway.
    pub resp_buffer_max: usize,

    // ─────────────────────────────────────────────────────────────────────────
    // Telemetry
    // ─────────────────────────────────────────────────────────────────────────
    /// Emit per-upload telemetry events
    pub telemetry_enabled: bool,

    /// Optional collector that receives telemetry events as JSON
    pub telemetry_endpoint: Option<Url>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            auth: AuthMode::Disabled,
            upstream: default_upstream(),

            tcp_nodelay: true,
            tcp_keepalive_secs: 60,
            socket_buffer_size: 262144, // 256 KB
            max_concurrent_streams: 10000,
            pool_max_idle_per_host: 128,

            resp_buffer_max: 10 * 1024 * 1024, // 10 MB

            telemetry_enabled: true,
            telemetry_endpoint: None,
        }
    }
}

impl GateConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `AUTH_CODE` (default: unset, auth disabled)
    /// - `UPSTREAM_URL` (default: `https://telegra.ph`)
    /// - `AUTHGATE_TCP_NODELAY` (default: true)
    /// - `AUTHGATE_TCP_KEEPALIVE_SECS` (default: 60)
    /// - `AUTHGATE_SOCKET_BUFFER_SIZE` (default: 262144)
    /// - `AUTHGATE_MAX_CONCURRENT_STREAMS` (default: 10000)
    /// - `AUTHGATE_POOL_MAX_IDLE` (default: 128)
    /// - `AUTHGATE_RESP_BUFFER_MAX` (default: 10485760 = 10MB)
    /// - `DISABLE_TELEMETRY` (default: unset, telemetry on)
    /// - `TELEMETRY_ENDPOINT` (default: unset, log only)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when `UPSTREAM_URL` or `TELEMETRY_ENDPOINT` is
    /// set but unusable. Numeric knobs silently fall back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();

        let upstream = match env_string("UPSTREAM_URL") {
            Some(raw) => parse_upstream(&raw)?,
            None => default.upstream,
        };

        let telemetry_endpoint = match env_string("TELEMETRY_ENDPOINT") {
            Some(raw) => Some(Url::parse(&raw).map_err(|e| {
                ConfigError::InvalidTelemetryEndpoint {
                    url: raw.clone(),
                    message: e.to_string(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            auth: AuthMode::from_value(std::env::var("AUTH_CODE").ok().as_deref()),
            upstream,

            tcp_nodelay: env_parse("AUTHGATE_TCP_NODELAY").unwrap_or(default.tcp_nodelay),

            tcp_keepalive_secs: env_parse("AUTHGATE_TCP_KEEPALIVE_SECS")
                .unwrap_or(default.tcp_keepalive_secs),

            socket_buffer_size: env_parse("AUTHGATE_SOCKET_BUFFER_SIZE")
                .unwrap_or(default.socket_buffer_size),

            max_concurrent_streams: env_parse("AUTHGATE_MAX_CONCURRENT_STREAMS")
                .unwrap_or(default.max_concurrent_streams),

            pool_max_idle_per_host: env_parse("AUTHGATE_POOL_MAX_IDLE")
                .unwrap_or(default.pool_max_idle_per_host),

            resp_buffer_max: env_parse("AUTHGATE_RESP_BUFFER_MAX")
                .unwrap_or(default.resp_buffer_max),

            telemetry_enabled: !std::env::var("DISABLE_TELEMETRY")
                .map(|v| is_truthy(&v))
                .unwrap_or(false),

            telemetry_endpoint,
        })
    }

    /// Replace the upstream origin, validating it the same way `from_env` does.
    pub fn with_upstream(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.upstream = parse_upstream(raw)?;
        Ok(self)
    }
}

/// Parse an upstream origin; only `http` and `https` are accepted.
pub fn parse_upstream(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUpstream {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::UnsupportedScheme {
                scheme: other.to_string(),
            });
        }
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUpstream {
            url: raw.to_string(),
            message: "missing host".to_string(),
        });
    }
    Ok(url)
}

fn default_upstream() -> Url {
    // Constant input, parse cannot fail.
    Url::parse(DEFAULT_UPSTREAM_URL).unwrap_or_else(|_| unreachable!("default upstream is valid"))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
