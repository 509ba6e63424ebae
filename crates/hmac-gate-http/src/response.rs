//! Response bodies and the unauthorized/challenge responses.

use std::convert::Infallible;
use std::io;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use tracing::warn;

use hmac_gate_auth::SIGNATURE_SCHEME;

/// Type-erased response body shared by the gate and gated handlers.
pub type GateBody = BoxBody<Bytes, io::Error>;

/// Create a [`GateBody`] from bytes.
pub fn body_from_bytes(data: impl Into<Bytes>) -> GateBody {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Create a [`GateBody`] from text.
pub fn body_from_string(text: impl Into<String>) -> GateBody {
    body_from_bytes(Bytes::from(text.into()))
}

/// Create an empty [`GateBody`].
#[must_use]
pub fn empty_body() -> GateBody {
    Empty::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Parse a challenge string into a header value.
///
/// Falls back to the bare scheme if the configured realm cannot be encoded.
#[must_use]
pub fn challenge_header(challenge: &str) -> HeaderValue {
    HeaderValue::try_from(challenge).unwrap_or_else(|_| {
        warn!(challenge, "challenge is not a valid header value, omitting realm");
        HeaderValue::from_static(SIGNATURE_SCHEME)
    })
}

/// A `401 Unauthorized` response with a plain-text reason and a challenge.
#[must_use]
pub fn unauthorized(challenge: &HeaderValue, message: impl Into<String>) -> http::Response<GateBody> {
    plain_text(StatusCode::UNAUTHORIZED, message, Some(challenge))
}

/// A `400 Bad Request` response with a plain-text reason.
#[must_use]
pub fn bad_request(message: impl Into<String>) -> http::Response<GateBody> {
    plain_text(StatusCode::BAD_REQUEST, message, None)
}

/// Attach the challenge to a handler's `401` response if it lacks one.
#[must_use]
pub fn add_challenge_on_unauthorized(
    mut response: http::Response<GateBody>,
    challenge: &HeaderValue,
) -> http::Response<GateBody> {
    if response.status() == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .entry(WWW_AUTHENTICATE)
            .or_insert_with(|| challenge.clone());
    }
    response
}

fn plain_text(
    status: StatusCode,
    message: impl Into<String>,
    challenge: Option<&HeaderValue>,
) -> http::Response<GateBody> {
    let mut response = http::Response::new(body_from_string(message));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Some(challenge) = challenge {
        headers.insert(WWW_AUTHENTICATE, challenge.clone());
    }
    response
}
