//! Per-request authentication decisions.
//!
//! [`AuthenticationGate::authenticate`] evaluates a request once, first match
//! wins:
//!
//! 1. gate disabled → [`AuthOutcome::Bypassed`] with the placeholder identity
//! 2. no `Authorization` header, or a foreign scheme → [`AuthOutcome::MissingCredentials`]
//! 3. empty token → rejected, `token missing`
//! 4. no caller-id header → rejected, `user id header missing`
//! 5. empty caller id → rejected, `user id missing`
//! 6. no secret for the caller → rejected, `unknown caller`
//! 7. signature invalid or expired → rejected, `invalid or expired signature`
//! 8. otherwise → [`AuthOutcome::Authenticated`]
//!
//! `MissingCredentials` is not a rejection. The request carries no identity
//! and the surrounding pipeline decides whether that is acceptable.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::request::{SIGNATURE_SCHEME, SignedRequest, format_http_date};
use crate::secrets::SecretStore;
use crate::signature::{create_request_signature, verify_at};

/// Identity assigned to every request while the gate is disabled.
pub const ANONYMOUS_CALLER_ID: &str = "0";

/// Default replay window in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;

/// Maximum number of body characters echoed in a diagnostic.
const DIAGNOSTIC_BODY_LIMIT: usize = 1024;

/// Configuration for an [`AuthenticationGate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// When false, every request is let through with [`ANONYMOUS_CALLER_ID`].
    pub enabled: bool,
    /// How long a signature stays valid after its `Date`, in seconds.
    pub timeout_seconds: u64,
    /// Realm advertised in the `WWW-Authenticate` challenge.
    pub realm: Option<String>,
    /// Build the signature diagnostic for mismatches, attach it to the
    /// rejection message, and include it in the debug log.
    ///
    /// The diagnostic contains the expected signature and request content, so
    /// it must stay off outside of troubleshooting sessions.
    pub debug_diagnostics: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            realm: None,
            debug_diagnostics: false,
        }
    }
}

impl GateConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HMAC_ENABLED` | `true` (only `false` disables) |
    /// | `HMAC_SIGNATURE_TIMEOUT` | `600` |
    /// | `HMAC_REALM` | *(unset)* |
    /// | `HMAC_DEBUG_DIAGNOSTICS` | `false` |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("HMAC_ENABLED") {
            config.enabled = !v.trim().eq_ignore_ascii_case("false");
        }
        if let Some(v) = lookup("HMAC_SIGNATURE_TIMEOUT") {
            match v.trim().parse() {
                Ok(timeout) => config.timeout_seconds = timeout,
                Err(_) => warn!(value = %v, "invalid HMAC_SIGNATURE_TIMEOUT, using default"),
            }
        }
        if let Some(v) = lookup("HMAC_REALM") {
            if !v.is_empty() {
                config.realm = Some(v);
            }
        }
        if let Some(v) = lookup("HMAC_DEBUG_DIAGNOSTICS") {
            config.debug_diagnostics = v == "1" || v.eq_ignore_ascii_case("true");
        }

        config
    }
}

/// Why a request was explicitly rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The `Authorization` header has the right scheme but no token.
    TokenMissing,
    /// The caller-identifier header is absent.
    CallerIdHeaderMissing,
    /// The caller-identifier header is empty.
    CallerIdMissing,
    /// No secret is known for the caller.
    UnknownCaller,
    /// The signature does not match or is outside the replay window.
    InvalidSignature,
}

impl RejectReason {
    /// Plain-text reason returned to the client.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenMissing => "token missing",
            Self::CallerIdHeaderMissing => "user id header missing",
            Self::CallerIdMissing => "user id missing",
            Self::UnknownCaller => "unknown caller",
            Self::InvalidSignature => "invalid or expired signature",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An explicit rejection, optionally carrying troubleshooting detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// The rejection reason.
    pub reason: RejectReason,
    /// Signature diagnostic, only present when enabled in [`GateConfig`].
    pub diagnostic: Option<String>,
}

impl Rejection {
    /// The response message: the reason, followed by the diagnostic if any.
    #[must_use]
    pub fn message(&self) -> String {
        match &self.diagnostic {
            Some(diagnostic) => format!("{}. {diagnostic}", self.reason),
            None => self.reason.to_string(),
        }
    }
}

/// Result of authenticating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Authentication is disabled; the request runs as [`ANONYMOUS_CALLER_ID`].
    Bypassed,
    /// The request carries no credentials for this scheme.
    MissingCredentials,
    /// The request carried credentials that failed a check.
    Rejected(Rejection),
    /// The signature was verified for this caller.
    Authenticated(String),
}

impl AuthOutcome {
    /// The identity the request runs as, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Bypassed => Some(ANONYMOUS_CALLER_ID),
            Self::Authenticated(caller_id) => Some(caller_id.as_str()),
            Self::MissingCredentials | Self::Rejected(_) => None,
        }
    }

    /// Whether the request was explicitly rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Request-scoped values produced alongside the outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Identity for downstream consumers.
    pub caller_id: Option<String>,
}

/// Outcome plus the context to thread through the rest of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    /// What the gate decided.
    pub outcome: AuthOutcome,
    /// Values for later pipeline stages.
    pub context: AuthContext,
}

impl AuthDecision {
    fn from_outcome(outcome: AuthOutcome) -> Self {
        let context = AuthContext {
            caller_id: outcome.identity().map(ToOwned::to_owned),
        };
        Self { outcome, context }
    }
}

/// Authenticates requests against a [`SecretStore`].
#[derive(Debug, Clone)]
pub struct AuthenticationGate<S> {
    config: GateConfig,
    store: S,
}

impl<S: SecretStore> AuthenticationGate<S> {
    /// Create a gate.
    pub fn new(config: GateConfig, store: S) -> Self {
        Self { config, store }
    }

    /// The gate configuration.
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// The backing secret store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Authenticate a request against the current time.
    #[must_use]
    pub fn authenticate(&self, request: &SignedRequest) -> AuthDecision {
        self.authenticate_at(request, Utc::now())
    }

    /// Authenticate a request against an explicit clock reading.
    #[must_use]
    pub fn authenticate_at(&self, request: &SignedRequest, now: DateTime<Utc>) -> AuthDecision {
        AuthDecision::from_outcome(self.evaluate(request, now))
    }

    /// Value of the `WWW-Authenticate` header sent with unauthorized responses.
    #[must_use]
    pub fn challenge(&self) -> String {
        match self.config.realm.as_deref() {
            Some(realm) if !realm.is_empty() => format!("{SIGNATURE_SCHEME} realm=\"{realm}\""),
            _ => SIGNATURE_SCHEME.to_owned(),
        }
    }

    fn evaluate(&self, request: &SignedRequest, now: DateTime<Utc>) -> AuthOutcome {
        if !self.config.enabled {
            return AuthOutcome::Bypassed;
        }

        let authorization = match request.authorization() {
            Some(auth) if auth.scheme == SIGNATURE_SCHEME => auth,
            _ => return AuthOutcome::MissingCredentials,
        };
        if authorization.parameter.is_empty() {
            return reject(RejectReason::TokenMissing, None);
        }

        let Some(caller_id) = request.caller_id() else {
            return reject(RejectReason::CallerIdHeaderMissing, None);
        };
        if caller_id.is_empty() {
            return reject(RejectReason::CallerIdMissing, None);
        }

        let secret = match self.store.resolve_secret(caller_id) {
            Some(secret) if !secret.trim().is_empty() => secret,
            _ => {
                warn!(caller_id, "no secret configured for caller");
                return reject(RejectReason::UnknownCaller, None);
            }
        };

        let uri = request.uri().to_lowercase();
        let strip_scheme = self
            .store
            .protocol_strip_list()
            .iter()
            .any(|site| uri.contains(site.as_str()));

        if verify_at(
            request,
            caller_id,
            &secret,
            self.config.timeout_seconds,
            strip_scheme,
            now,
        ) {
            debug!(caller_id, strip_scheme, "request authenticated");
            return AuthOutcome::Authenticated(caller_id.to_owned());
        }

        if !self.config.debug_diagnostics {
            debug!(caller_id, strip_scheme, "signature verification failed");
            return reject(RejectReason::InvalidSignature, None);
        }

        let diagnostic = build_diagnostic(
            request,
            &secret,
            strip_scheme,
            authorization.parameter,
            caller_id,
            now,
        );
        debug!(caller_id, diagnostic = %diagnostic, "signature verification failed");
        reject(RejectReason::InvalidSignature, Some(diagnostic))
    }
}

fn reject(reason: RejectReason, diagnostic: Option<String>) -> AuthOutcome {
    warn!(reason = %reason, "request rejected");
    AuthOutcome::Rejected(Rejection { reason, diagnostic })
}

fn build_diagnostic(
    request: &SignedRequest,
    secret: &str,
    strip_scheme: bool,
    supplied: &str,
    caller_id: &str,
    now: DateTime<Utc>,
) -> String {
    let expected = create_request_signature(request, secret, strip_scheme)
        .unwrap_or_else(|e| format!("<unavailable: {e}>"));
    let body: String = String::from_utf8_lossy(request.body())
        .chars()
        .take(DIAGNOSTIC_BODY_LIMIT)
        .collect();
    let request_time = request
        .timestamp()
        .map(|ts| format_http_date(&ts))
        .unwrap_or_default();

    format!(
        "expected signature: {expected}, supplied signature: {supplied}, method: {}, uri: {}, \
         body: {body}, request time: {request_time}, server time: {}, caller: {caller_id}, \
         scheme: {SIGNATURE_SCHEME}",
        request.method(),
        request.uri(),
        format_http_date(&now),
    )
}
