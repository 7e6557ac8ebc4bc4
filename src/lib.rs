//! authgate - token-gated forwarding proxy for an upstream content host.
//!
//! Clients prove possession of a shared secret with a short-lived token
//! (`base64("<code>-<issued_at_ms>")`) carried in the `authCode` query
//! parameter, the `Referer` query, an `authCode` header or an `authCode`
//! cookie. Authorized `/upload` requests are forwarded to the upstream with
//! the token stripped; `/check` only answers whether the token is good.
//!
//! # Modules
//!
//! - [`auth`]: token resolution, validation and the request gate.
//! - [`proxy_service`]: upstream forwarding over a pooled hyper-rustls client.
//! - [`relay`]: upstream response descriptor and JSON re-encoding.
//! - [`gateway`]: routing and the `tower::Service` tying it together.
//! - [`telemetry`]: fire-and-forget upload reporting.
//! - [`server`]: accept loop, concurrency limit and graceful drain.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging_layer;
pub mod proxy_body;
pub mod proxy_service;
pub mod relay;
pub mod server;
pub mod telemetry;

pub use config::GateConfig;
pub use error::{ConfigError, ProxyError, ProxyResult};
pub use gateway::GatewayService;
