//! Token resolution, validation and the request gate.
//!
//! # Request flow
//!
//! ```text
//! Request ──► resolver::resolve_token() ──► Option<CandidateToken>
//!                                                 │
//!                                                 ▼
//!                       gate::RequestGate::check() ── token::verify()
//!                                                 │
//!                          ┌──────────────────────┴──────────────┐
//!                          ▼                                     ▼
//!                  GateDecision::Authorized              GateDecision::Rejected
//!                  (check → 200, upload → forward)       (401 "error")
//! ```

pub mod gate;
pub mod resolver;
pub mod token;

pub use gate::{GateDecision, RequestGate, UNAUTHORIZED_REASON, unauthorized_response};
pub use resolver::{CandidateToken, TokenSource, resolve_token};
pub use token::{DecodedToken, FRESHNESS_WINDOW, TokenError, decode_token, encode_token, is_valid, verify};

use std::fmt;

/// Name shared by the query parameter, header and cookie that carry the token.
pub const AUTH_PARAM: &str = "authCode";

/// The server-held secret a token's code must equal.
///
/// Never blank: a blank configured value turns into [`AuthMode::Disabled`]
/// instead.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Returns `None` when the value is blank after trimming.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Whether the gate enforces tokens at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// No secret configured: every request is authorized.
    Disabled,
    /// Tokens must carry this secret and be fresh.
    Enforced(Secret),
}

impl AuthMode {
    /// Build from the raw `AUTH_CODE` value; absent or blank disables auth.
    pub fn from_value(value: Option<&str>) -> Self {
        match value.and_then(Secret::new) {
            Some(secret) => AuthMode::Enforced(secret),
            None => AuthMode::Disabled,
        }
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self, AuthMode::Enforced(_))
    }
}
