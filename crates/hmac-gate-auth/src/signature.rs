//! HMAC-SHA256 request signatures.
//!
//! The string to sign is the plain concatenation (no separators) of:
//!
//! ```text
//! lowercase(HTTP-Method) +
//! lowercase(Request-URI)   (optionally with "http:" / "https:" removed) +
//! RFC1123(Date)            e.g. "Sun, 06 Nov 1994 08:49:37 GMT" +
//! Body                     (UTF-8 text)
//! ```
//!
//! and `Signature = Base64(HMAC-SHA256(Secret, StringToSign))`.
//!
//! Scheme stripping lets a signer behind a TLS-terminating proxy (which sees
//! `https://`) and a verifier (which sees `http://`) agree on the same string.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, KeyInit, Mac};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::SignatureError;
use crate::request::{CALLER_ID_HEADER, SIGNATURE_SCHEME, SignedRequest, format_http_date};

type HmacSha256 = Hmac<Sha256>;

/// Build the canonical string for a request.
///
/// The body is interpreted as UTF-8; invalid sequences are replaced rather
/// than rejected so that signer and verifier decode identically.
#[must_use]
pub fn build_string_to_sign(
    method: &str,
    uri: &str,
    timestamp: &DateTime<Utc>,
    body: &[u8],
    strip_scheme: bool,
) -> String {
    let mut uri = uri.to_lowercase();
    if strip_scheme {
        uri = uri.replace("http:", "").replace("https:", "");
    }
    let method = method.to_lowercase();
    let date = format_http_date(timestamp);
    let body = String::from_utf8_lossy(body);

    format!("{method}{uri}{date}{body}")
}

/// Compute the base64 HMAC-SHA256 signature for the given request fields.
///
/// # Errors
///
/// Returns [`SignatureError::EmptySecret`] when `secret` is empty or
/// whitespace-only.
pub fn create_signature(
    method: &str,
    uri: &str,
    timestamp: &DateTime<Utc>,
    body: &[u8],
    secret: &str,
    strip_scheme: bool,
) -> Result<String, SignatureError> {
    if secret.trim().is_empty() {
        return Err(SignatureError::EmptySecret);
    }

    let string_to_sign = build_string_to_sign(method, uri, timestamp, body, strip_scheme);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::EmptySecret)?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Compute the signature of a [`SignedRequest`] using its `Date` header.
///
/// # Errors
///
/// Returns [`SignatureError::MissingTimestamp`] when the request has no
/// parseable `Date` header, or [`SignatureError::EmptySecret`].
pub fn create_request_signature(
    request: &SignedRequest,
    secret: &str,
    strip_scheme: bool,
) -> Result<String, SignatureError> {
    let timestamp = request
        .timestamp()
        .ok_or(SignatureError::MissingTimestamp)?;
    create_signature(
        request.method().as_str(),
        request.uri(),
        &timestamp,
        request.body(),
        secret,
        strip_scheme,
    )
}

/// Sign a request on behalf of `caller_id`.
///
/// Stamps the `Date` header with the current UTC time if it is missing, sets
/// `Authorization: <scheme> <signature>`, and adds the caller-identifier
/// header unless one is already present.
pub fn sign(
    mut request: SignedRequest,
    caller_id: &str,
    secret: &str,
    strip_scheme: bool,
) -> Result<SignedRequest, SignatureError> {
    if request.timestamp().is_none() {
        request.set_timestamp(&Utc::now())?;
    }

    let signature = create_request_signature(&request, secret, strip_scheme)?;

    let authorization = HeaderValue::try_from(format!("{SIGNATURE_SCHEME} {signature}"))
        .map_err(|_| SignatureError::InvalidHeaderValue("authorization"))?;
    request.headers_mut().insert(AUTHORIZATION, authorization);

    if !request.headers().contains_key(CALLER_ID_HEADER) {
        let caller = HeaderValue::try_from(caller_id)
            .map_err(|_| SignatureError::InvalidHeaderValue("caller id"))?;
        request.headers_mut().insert(CALLER_ID_HEADER, caller);
    }

    Ok(request)
}

/// Check whether `request` carries a valid, unexpired signature for `caller_id`.
///
/// Never fails: every malformed or mismatching input yields `false`. The
/// replay window is one-sided; timestamps in the future are accepted to
/// tolerate clock skew.
#[must_use]
pub fn verify(
    request: &SignedRequest,
    caller_id: &str,
    secret: &str,
    timeout_seconds: u64,
    strip_scheme: bool,
) -> bool {
    verify_at(
        request,
        caller_id,
        secret,
        timeout_seconds,
        strip_scheme,
        Utc::now(),
    )
}

/// [`verify`] against an explicit clock reading.
#[must_use]
pub fn verify_at(
    request: &SignedRequest,
    caller_id: &str,
    secret: &str,
    timeout_seconds: u64,
    strip_scheme: bool,
    now: DateTime<Utc>,
) -> bool {
    if request.caller_id() != Some(caller_id) {
        debug!(caller_id, "caller id header missing or mismatched");
        return false;
    }

    let Some(authorization) = request.authorization() else {
        return false;
    };
    if authorization.scheme != SIGNATURE_SCHEME || authorization.parameter.is_empty() {
        return false;
    }

    let Some(timestamp) = request.timestamp() else {
        return false;
    };
    if is_expired(&timestamp, timeout_seconds, &now) {
        debug!(
            caller_id,
            request_time = %format_http_date(&timestamp),
            server_time = %format_http_date(&now),
            timeout_seconds,
            "signature expired"
        );
        return false;
    }

    let Ok(expected) = create_signature(
        request.method().as_str(),
        request.uri(),
        &timestamp,
        request.body(),
        secret,
        strip_scheme,
    ) else {
        return false;
    };

    signatures_match(authorization.parameter, &expected)
}

/// Constant-time comparison of two signatures.
#[must_use]
pub fn signatures_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Generate a random 64-byte secret key, base64-encoded.
#[must_use]
pub fn generate_secret_key() -> String {
    let high: [u8; 32] = rand::random();
    let low: [u8; 32] = rand::random();
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(&high);
    data.extend_from_slice(&low);
    BASE64.encode(data)
}

fn is_expired(timestamp: &DateTime<Utc>, timeout_seconds: u64, now: &DateTime<Utc>) -> bool {
    let timeout = i64::try_from(timeout_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX);
    match timestamp.checked_add_signed(timeout) {
        Some(deadline) => deadline < *now,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use http::Method;

    use super::*;

    const SECRET: &str = "k1";

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap()
    }

    fn signed_get(uri: &str) -> SignedRequest {
        let mut req = SignedRequest::new(Method::GET, uri);
        req.set_timestamp(&fixed_time()).unwrap();
        sign(req, "alice", SECRET, false).unwrap()
    }

    #[test]
    fn test_should_build_string_to_sign_without_separators() {
        let s = build_string_to_sign(
            "POST",
            "HTTPS://API.Example.com/Items",
            &fixed_time(),
            b"{\"a\":1}",
            false,
        );
        assert_eq!(
            s,
            "posthttps://api.example.com/itemsSat, 28 Feb 2026 12:00:00 GMT{\"a\":1}"
        );
    }

    #[test]
    fn test_should_strip_scheme_from_string_to_sign() {
        let s = build_string_to_sign("GET", "https://host/path", &fixed_time(), b"", true);
        assert!(s.starts_with("get//host/path"));
    }

    #[test]
    fn test_should_create_deterministic_signature() {
        let a = create_signature("GET", "/resource", &fixed_time(), b"x", SECRET, false).unwrap();
        let b = create_signature("GET", "/resource", &fixed_time(), b"x", SECRET, false).unwrap();
        assert_eq!(a, b);
        // 32-byte digest -> 44 base64 characters.
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_should_change_signature_when_any_field_changes() {
        let t = fixed_time();
        let base = create_signature("GET", "/resource", &t, b"x", SECRET, false).unwrap();

        let variants = [
            create_signature("PUT", "/resource", &t, b"x", SECRET, false),
            create_signature("GET", "/other", &t, b"x", SECRET, false),
            create_signature("GET", "/resource", &(t + Duration::seconds(1)), b"x", SECRET, false),
            create_signature("GET", "/resource", &t, b"y", SECRET, false),
            create_signature("GET", "/resource", &t, b"x", "k2", false),
        ];
        for variant in variants {
            assert_ne!(variant.unwrap(), base);
        }
    }

    #[test]
    fn test_should_ignore_case_of_method_and_uri() {
        let t = fixed_time();
        let lower = create_signature("get", "http://host/a", &t, b"", SECRET, false).unwrap();
        let upper = create_signature("GET", "HTTP://HOST/A", &t, b"", SECRET, false).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_should_match_signatures_across_schemes_only_when_stripping() {
        let t = fixed_time();
        let http = create_signature("GET", "http://host/path", &t, b"", SECRET, true).unwrap();
        let https = create_signature("GET", "https://host/path", &t, b"", SECRET, true).unwrap();
        assert_eq!(http, https);

        let http = create_signature("GET", "http://host/path", &t, b"", SECRET, false).unwrap();
        let https = create_signature("GET", "https://host/path", &t, b"", SECRET, false).unwrap();
        assert_ne!(http, https);
    }

    #[test]
    fn test_should_reject_empty_secret() {
        let result = create_signature("GET", "/", &fixed_time(), b"", "", false);
        assert!(matches!(result, Err(SignatureError::EmptySecret)));
        let result = create_signature("GET", "/", &fixed_time(), b"", "   ", false);
        assert!(matches!(result, Err(SignatureError::EmptySecret)));
    }

    #[test]
    fn test_should_require_timestamp_for_request_signature() {
        let req = SignedRequest::new(Method::GET, "/");
        let result = create_request_signature(&req, SECRET, false);
        assert!(matches!(result, Err(SignatureError::MissingTimestamp)));
    }

    #[test]
    fn test_should_assign_timestamp_when_signing() {
        let before = Utc::now() - Duration::seconds(1);
        let req = sign(SignedRequest::new(Method::GET, "/"), "alice", SECRET, false).unwrap();
        let ts = req.timestamp().unwrap();
        assert!(ts >= before);
        assert!(ts <= Utc::now());
    }

    #[test]
    fn test_should_keep_existing_timestamp_when_signing() {
        let req = signed_get("http://host/resource");
        assert_eq!(req.timestamp(), Some(fixed_time()));
    }

    #[test]
    fn test_should_set_authorization_and_caller_headers() {
        let req = signed_get("http://host/resource");
        let auth = req.authorization().unwrap();
        assert_eq!(auth.scheme, SIGNATURE_SCHEME);
        assert_eq!(
            auth.parameter,
            create_request_signature(&req, SECRET, false).unwrap()
        );
        assert_eq!(req.caller_id(), Some("alice"));
    }

    #[test]
    fn test_should_not_overwrite_existing_caller_header() {
        let mut req = SignedRequest::new(Method::GET, "/")
            .with_header(CALLER_ID_HEADER, HeaderValue::from_static("bob"));
        req.set_timestamp(&fixed_time()).unwrap();
        let req = sign(req, "alice", SECRET, false).unwrap();
        assert_eq!(req.caller_id(), Some("bob"));
        assert_eq!(req.headers().get_all(CALLER_ID_HEADER).iter().count(), 1);
    }

    #[test]
    fn test_should_fail_signing_with_empty_secret() {
        let result = sign(SignedRequest::new(Method::GET, "/"), "alice", "", false);
        assert!(matches!(result, Err(SignatureError::EmptySecret)));
    }

    #[test]
    fn test_should_verify_freshly_signed_request() {
        let req = SignedRequest::new(Method::POST, "https://api.tools.com/apr/something")
            .with_body("{'test':'1'}");
        let req = sign(req, "test", SECRET, false).unwrap();
        assert!(verify(&req, "test", SECRET, 600, false));
    }

    #[test]
    fn test_should_reject_request_outside_replay_window() {
        let now = fixed_time();
        let timeout = 600;

        let mut stale = SignedRequest::new(Method::GET, "/resource");
        stale
            .set_timestamp(&(now - Duration::seconds(timeout + 1)))
            .unwrap();
        let stale = sign(stale, "alice", SECRET, false).unwrap();
        assert!(!verify_at(&stale, "alice", SECRET, 600, false, now));

        let mut fresh = SignedRequest::new(Method::GET, "/resource");
        fresh
            .set_timestamp(&(now - Duration::seconds(timeout - 1)))
            .unwrap();
        let fresh = sign(fresh, "alice", SECRET, false).unwrap();
        assert!(verify_at(&fresh, "alice", SECRET, 600, false, now));
    }

    #[test]
    fn test_should_accept_request_exactly_at_window_edge() {
        let req = signed_get("/resource");
        let edge = fixed_time() + Duration::seconds(600);
        assert!(verify_at(&req, "alice", SECRET, 600, false, edge));
    }

    #[test]
    fn test_should_accept_timestamps_from_the_future() {
        let req = signed_get("/resource");
        let earlier = fixed_time() - Duration::hours(2);
        assert!(verify_at(&req, "alice", SECRET, 600, false, earlier));
    }

    #[test]
    fn test_should_reject_mismatched_caller_id() {
        let req = signed_get("/resource");
        assert!(!verify_at(&req, "mallory", SECRET, 600, false, fixed_time()));
    }

    #[test]
    fn test_should_reject_wrong_secret() {
        let req = signed_get("/resource");
        assert!(!verify_at(&req, "alice", "k2", 600, false, fixed_time()));
    }

    #[test]
    fn test_should_reject_missing_or_foreign_authorization() {
        let mut req = signed_get("/resource");
        req.headers_mut().remove(AUTHORIZATION);
        assert!(!verify_at(&req, "alice", SECRET, 600, false, fixed_time()));

        let mut req = signed_get("/resource");
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(!verify_at(&req, "alice", SECRET, 600, false, fixed_time()));

        let mut req = signed_get("/resource");
        req.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_static("WebAPI-Security-HMAC-Scheme"),
        );
        assert!(!verify_at(&req, "alice", SECRET, 600, false, fixed_time()));
    }

    #[test]
    fn test_should_reject_missing_timestamp() {
        let mut req = signed_get("/resource");
        req.headers_mut().remove(http::header::DATE);
        assert!(!verify_at(&req, "alice", SECRET, 600, false, fixed_time()));
    }

    #[test]
    fn test_should_reject_tampered_body() {
        let req = signed_get("/resource").with_body("injected");
        assert!(!verify_at(&req, "alice", SECRET, 600, false, fixed_time()));
    }

    #[test]
    fn test_should_run_signing_scenario_end_to_end() {
        let t = fixed_time();
        let req = signed_get("http://host/resource");

        assert!(verify_at(&req, "alice", "k1", 600, false, t));
        assert!(!verify_at(
            &req,
            "alice",
            "k1",
            600,
            false,
            t + Duration::seconds(601)
        ));
        assert!(!verify_at(&req, "alice", "k2", 600, false, t));

        let mut stripped = SignedRequest::new(Method::GET, "http://host/resource");
        stripped.set_timestamp(&t).unwrap();
        let stripped = sign(stripped, "alice", "k1", true).unwrap();
        let signature = stripped.authorization().unwrap().parameter.to_owned();

        let mut via_proxy = SignedRequest::new(Method::GET, "https://host/resource");
        via_proxy.set_timestamp(&t).unwrap();
        let via_proxy = via_proxy
            .with_header(CALLER_ID_HEADER, HeaderValue::from_static("alice"))
            .with_header(
                AUTHORIZATION,
                HeaderValue::try_from(format!("{SIGNATURE_SCHEME} {signature}")).unwrap(),
            );
        assert!(verify_at(&via_proxy, "alice", "k1", 600, true, t));
        assert!(!verify_at(&via_proxy, "alice", "k1", 600, false, t));
    }

    #[test]
    fn test_should_compare_signatures_exactly() {
        assert!(signatures_match("abc=", "abc="));
        assert!(!signatures_match("abc=", "abd="));
        assert!(!signatures_match("abc", "abc="));
    }

    #[test]
    fn test_should_generate_distinct_64_byte_keys() {
        let a = generate_secret_key();
        let b = generate_secret_key();
        assert_ne!(a, b);
        assert_eq!(BASE64.decode(&a).unwrap().len(), 64);
    }
}
