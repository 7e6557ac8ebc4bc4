//! Token wire format and validation.
//!
//! A token is the base64 encoding of the ASCII string `"<code>-<issued_at_ms>"`.
//! It is valid when `code` equals the configured secret byte-for-byte and
//! `issued_at_ms` is no older than [`FRESHNESS_WINDOW`]. Tokens issued in the
//! future are accepted.

use super::Secret;
use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Maximum age of a token's issuance timestamp.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(30 * 60);

const SEPARATOR: char = '-';

/// Standard alphabet, padding optional, stray trailing bits tolerated.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Why a candidate token was refused.
///
/// Only ever logged; callers see a single opaque 401.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("no token supplied")]
    Missing,

    #[error("token is not valid base64: {0}")]
    Encoding(String),

    #[error("decoded token is not valid UTF-8")]
    NotUtf8,

    #[error("decoded token has no code")]
    MissingCode,

    #[error("decoded token has no timestamp")]
    MissingTimestamp,

    #[error("token timestamp is not an integer")]
    InvalidTimestamp,

    #[error("token issued at {issued_at_ms} is older than the freshness window")]
    Expired { issued_at_ms: i64 },

    #[error("token code does not match")]
    CodeMismatch,
}

/// A token after base64 decoding and splitting.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub code: String,
    pub issued_at_ms: i64,
}

impl std::fmt::Debug for DecodedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedToken")
            .field("code", &"[REDACTED]")
            .field("issued_at_ms", &self.issued_at_ms)
            .finish()
    }
}

/// Encode `code` and an issuance time into the token wire format.
pub fn encode_token(code: &str, issued_at_ms: i64) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{code}{SEPARATOR}{issued_at_ms}"))
}

/// Decode a candidate token into its code and timestamp.
///
/// Accepts the URL-safe alphabet and ignores ASCII whitespace, the way
/// browser-side base64 helpers do.
pub fn decode_token(candidate: &str) -> Result<DecodedToken, TokenError> {
    let normalized: String = candidate
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let bytes = LENIENT
        .decode(normalized.as_bytes())
        .map_err(|e| TokenError::Encoding(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|_| TokenError::NotUtf8)?;

    let (code, timestamp) = text
        .split_once(SEPARATOR)
        .ok_or(TokenError::MissingTimestamp)?;
    if code.is_empty() {
        return Err(TokenError::MissingCode);
    }
    if timestamp.is_empty() {
        return Err(TokenError::MissingTimestamp);
    }
    let issued_at_ms = timestamp
        .parse::<i64>()
        .map_err(|_| TokenError::InvalidTimestamp)?;

    Ok(DecodedToken {
        code: code.to_string(),
        issued_at_ms,
    })
}

/// Check a candidate token against `secret` at time `now_ms`.
pub fn verify(secret: &Secret, candidate: Option<&str>, now_ms: i64) -> Result<(), TokenError> {
    let candidate = candidate.ok_or(TokenError::Missing)?;
    let token = decode_token(candidate)?;

    let window_ms = FRESHNESS_WINDOW.as_millis() as i64;
    if token.issued_at_ms < now_ms.saturating_sub(window_ms) {
        return Err(TokenError::Expired {
            issued_at_ms: token.issued_at_ms,
        });
    }

    if bool::from(token.code.as_bytes().ct_eq(secret.expose().as_bytes())) {
        Ok(())
    } else {
        Err(TokenError::CodeMismatch)
    }
}

/// Boolean form of [`verify`].
pub fn is_valid(secret: &Secret, candidate: Option<&str>, now_ms: i64) -> bool {
    verify(secret, candidate, now_ms).is_ok()
}
