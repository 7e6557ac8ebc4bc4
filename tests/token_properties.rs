//! Property-based tests for token validation, resolution and target rewriting.

use authgate::auth::{FRESHNESS_WINDOW, Secret, TokenSource, encode_token, is_valid, resolve_token};
use authgate::proxy_service::build_target;
use http::Request;
use proptest::prelude::*;
use url::Url;

const NOW: i64 = 1_700_000_000_000;

fn window_ms() -> i64 {
    FRESHNESS_WINDOW.as_millis() as i64
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategies
// ─────────────────────────────────────────────────────────────────────────────

/// Secrets as operators write them. `-` is the token separator and never
/// appears in a usable secret.
fn arb_secret() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.~!@#$%^&*]{1,40}"
}

/// Query parameter list with no `authCode` in it.
fn arb_params() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-z]{1,8}", "[A-Za-z0-9 ]{0,8}"), 0..6)
}

fn query_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn fresh_token_for_secret_is_valid(secret in arb_secret(), age in 0i64..=30 * 60 * 1000) {
        let token = encode_token(&secret, NOW - age);
        prop_assert!(is_valid(&Secret::new(secret).unwrap(), Some(&token), NOW));
    }

    #[test]
    fn future_tokens_are_valid(secret in arb_secret(), ahead in 0i64..=10 * 365 * 24 * 3_600_000) {
        let token = encode_token(&secret, NOW + ahead);
        prop_assert!(is_valid(&Secret::new(secret).unwrap(), Some(&token), NOW));
    }

    #[test]
    fn stale_tokens_are_invalid(secret in arb_secret(), extra in 1i64..=30 * 24 * 3_600_000) {
        let token = encode_token(&secret, NOW - window_ms() - extra);
        prop_assert!(!is_valid(&Secret::new(secret).unwrap(), Some(&token), NOW));
    }

    #[test]
    fn other_codes_are_invalid(secret in arb_secret(), code in arb_secret()) {
        prop_assume!(secret != code);
        let token = encode_token(&code, NOW);
        prop_assert!(!is_valid(&Secret::new(secret).unwrap(), Some(&token), NOW));
    }

    #[test]
    fn arbitrary_input_never_panics(secret in arb_secret(), candidate in any::<String>()) {
        let secret = Secret::new(secret).unwrap();
        let first = is_valid(&secret, Some(&candidate), NOW);
        // Same inputs, same answer.
        prop_assert_eq!(first, is_valid(&secret, Some(&candidate), NOW));
    }

    #[test]
    fn query_token_always_wins(query in "[A-Za-z0-9+/=]{1,24}", other in "[A-Za-z0-9]{1,24}") {
        let req = Request::builder()
            .uri(format!("/check?authCode={}", query_encode(&query)))
            .header("referer", format!("https://app.example/?authCode={other}"))
            .header("authCode", other.as_str())
            .header("cookie", format!("authCode={other}"))
            .body(())
            .unwrap();

        let candidate = resolve_token(&req).unwrap();
        prop_assert_eq!(candidate.source, TokenSource::Query);
        prop_assert_eq!(candidate.value, query);
    }

    #[test]
    fn target_never_carries_auth_code(
        params in arb_params(),
        position in 0usize..6,
        token in "[A-Za-z0-9+/=]{1,24}",
    ) {
        let mut pairs: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, query_encode(v)))
            .collect();
        let at = position.min(pairs.len());
        pairs.insert(at, format!("authCode={}", query_encode(&token)));
        let uri = format!("/upload?{}", pairs.join("&")).parse().unwrap();

        let upstream = Url::parse("https://telegra.ph").unwrap();
        let target = build_target(&upstream, &uri).unwrap();
        prop_assert_eq!(target.path(), "/upload");

        let kept: Vec<(String, String)> = target
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        prop_assert!(kept.iter().all(|(k, _)| k != "authCode"));
        prop_assert_eq!(kept, params);
    }
}
