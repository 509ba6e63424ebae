//! HMAC-SHA256 request signing and authentication for HmacGate.
//!
//! Callers share a secret with the service. A client signs each request by
//! hashing its method, URI, `Date`, and body with that secret and sends the
//! result in the `Authorization` header together with its caller identifier.
//! The service recomputes the signature, compares it in constant time, and
//! rejects requests whose `Date` falls outside the replay window.
//!
//! # Usage
//!
//! ```rust
//! use hmac_gate_auth::{
//!     AuthOutcome, AuthenticationGate, GateConfig, SignedRequest, StaticSecretStore, sign,
//! };
//!
//! let store = StaticSecretStore::new(vec![("alice".to_owned(), "s3cret".to_owned())]);
//! let gate = AuthenticationGate::new(GateConfig::default(), store);
//!
//! let request = SignedRequest::new(http::Method::GET, "http://api.example.com/items");
//! let request = sign(request, "alice", "s3cret", false).unwrap();
//!
//! let decision = gate.authenticate(&request);
//! assert_eq!(decision.outcome, AuthOutcome::Authenticated("alice".to_owned()));
//! ```
//!
//! # Modules
//!
//! - [`request`] - The request shape that is signed and verified
//! - [`signature`] - Canonicalization, signing, and verification
//! - [`secrets`] - Secret store trait and in-memory / file-backed stores
//! - [`gate`] - Per-request authentication decisions
//! - [`error`] - Signing and secret store errors

pub mod error;
pub mod gate;
pub mod request;
pub mod secrets;
pub mod signature;

pub use error::{SecretStoreError, SignatureError};
pub use gate::{
    ANONYMOUS_CALLER_ID, AuthContext, AuthDecision, AuthOutcome, AuthenticationGate, GateConfig,
    RejectReason, Rejection,
};
pub use request::{Authorization, CALLER_ID_HEADER, SIGNATURE_SCHEME, SignedRequest, normalize_uri};
pub use secrets::{FileSecretStore, SecretStore, StaticSecretStore, parse_strip_list};
pub use signature::{create_request_signature, create_signature, generate_secret_key, sign, verify};
