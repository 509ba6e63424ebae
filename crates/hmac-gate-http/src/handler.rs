//! The boundary between the gate and the application.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use hmac_gate_auth::AuthContext;

use crate::response::GateBody;

/// Application logic behind the gate.
///
/// Handlers receive the request head and the already-buffered body; the same
/// bytes were used for signature verification. The [`AuthContext`] produced
/// by the gate is available from `parts.extensions` (see [`caller_id`]).
pub trait GatedHandler: Send + Sync + 'static {
    /// Handle an admitted request.
    fn handle(
        &self,
        parts: http::request::Parts,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = http::Response<GateBody>> + Send>>;
}

/// The identity the gate admitted the request as, if any.
#[must_use]
pub fn caller_id(parts: &http::request::Parts) -> Option<&str> {
    parts
        .extensions
        .get::<AuthContext>()
        .and_then(|ctx| ctx.caller_id.as_deref())
}
