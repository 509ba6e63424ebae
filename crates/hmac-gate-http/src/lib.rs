//! Hyper service layer that authenticates HMAC-signed requests.
//!
//! - **Service**: [`GateHttpService`] buffers each request body once, runs the
//!   [`AuthenticationGate`](hmac_gate_auth::AuthenticationGate), and answers
//!   rejections with `401` plus a `WWW-Authenticate` challenge
//! - **Handler trait**: [`GatedHandler`] receives admitted requests together
//!   with the same buffered body and the gate's
//!   [`AuthContext`](hmac_gate_auth::AuthContext)
//! - **Response helpers**: body constructors and the challenge logic

pub mod handler;
pub mod response;
pub mod service;

pub use handler::{GatedHandler, caller_id};
pub use response::{GateBody, body_from_bytes, body_from_string, empty_body};
pub use service::{GateHttpConfig, GateHttpService, absolute_uri};
