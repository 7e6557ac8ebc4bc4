//! Locate the caller's token in an inbound request.
//!
//! Sources are tried in a fixed order and the first non-empty value wins:
//!
//! 1. `authCode` query parameter on the request URI
//! 2. `authCode` query parameter on the `Referer` URL
//! 3. `authCode` request header
//! 4. `authCode` cookie (percent-decoded)
//!
//! Values are never merged across sources.

use super::AUTH_PARAM;
use http::{HeaderMap, Request, Uri, header};
use percent_encoding::percent_decode_str;
use std::fmt;
use tracing::{debug, warn};
use url::{Url, form_urlencoded};

/// Where a candidate token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Query,
    Referer,
    Header,
    Cookie,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::Query => "query",
            TokenSource::Referer => "referer",
            TokenSource::Header => "header",
            TokenSource::Cookie => "cookie",
        }
    }
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw token string before decoding, tagged with its source.
#[derive(Clone, PartialEq, Eq)]
pub struct CandidateToken {
    pub value: String,
    pub source: TokenSource,
}

impl fmt::Debug for CandidateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateToken")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// Resolve the candidate token for a request.
pub fn resolve_token<B>(req: &Request<B>) -> Option<CandidateToken> {
    resolve_from_parts(req.uri(), req.headers())
}

/// Same as [`resolve_token`], working on the request head only.
pub fn resolve_from_parts(uri: &Uri, headers: &HeaderMap) -> Option<CandidateToken> {
    let found = from_query(uri)
        .map(|v| (v, TokenSource::Query))
        .or_else(|| from_referer(headers).map(|v| (v, TokenSource::Referer)))
        .or_else(|| from_header(headers).map(|v| (v, TokenSource::Header)))
        .or_else(|| from_cookie(headers).map(|v| (v, TokenSource::Cookie)));

    match found {
        Some((value, source)) => {
            debug!(source = %source, "Candidate token resolved");
            Some(CandidateToken { value, source })
        }
        None => {
            debug!("No candidate token in request");
            None
        }
    }
}

/// First `authCode` pair in a raw query string, if its value is non-empty.
pub(crate) fn query_param(query: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn from_query(uri: &Uri) -> Option<String> {
    uri.query().and_then(|q| query_param(q, AUTH_PARAM))
}

fn from_referer(headers: &HeaderMap) -> Option<String> {
    let referer = headers.get(header::REFERER)?;
    let referer = match referer.to_str() {
        Ok(s) => s,
        Err(_) => {
            warn!("Referer header is not valid ASCII, skipping");
            return None;
        }
    };

    match Url::parse(referer) {
        Ok(url) => url.query().and_then(|q| query_param(q, AUTH_PARAM)),
        Err(e) => {
            warn!(error = %e, "Invalid referer URL");
            None
        }
    }
}

fn from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTH_PARAM)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn from_cookie(headers: &HeaderMap) -> Option<String> {
    // HTTP/2 clients may split cookies across several header fields.
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookies| cookie_value(cookies, AUTH_PARAM))
}

/// Value of cookie `name` in a `Cookie` header, percent-decoded.
pub(crate) fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    let raw = cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim_start_matches(' ').split_once('=')?;
        (key == name && !value.is_empty()).then_some(value)
    })?;

    match percent_decode_str(raw).decode_utf8() {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(e) => {
            warn!(error = %e, cookie = name, "Cookie value is not valid UTF-8 after decoding");
            None
        }
    }
}
