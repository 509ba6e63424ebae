//! Demonstration handler that reports what the gate admitted.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use tracing::{debug, error};

use hmac_gate_http::{GateBody, GatedHandler, body_from_bytes, body_from_string, caller_id};

/// JSON document returned for every admitted request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EchoReply<'a> {
    caller_id: Option<&'a str>,
    method: &'a str,
    path: &'a str,
    body: String,
}

/// Echoes the admitted identity, request line, and body back as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl EchoHandler {
    fn reply(parts: &http::request::Parts, body: &Bytes) -> http::Response<GateBody> {
        let reply = EchoReply {
            caller_id: caller_id(parts),
            method: parts.method.as_str(),
            path: parts.uri.path(),
            body: String::from_utf8_lossy(body).into_owned(),
        };
        debug!(caller_id = ?reply.caller_id, path = reply.path, "echoing request");

        match serde_json::to_vec(&reply) {
            Ok(json) => {
                let mut response = http::Response::new(body_from_bytes(json));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => {
                error!(error = %e, "failed to serialize echo reply");
                let mut response = http::Response::new(body_from_string("internal error"));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }
}

impl GatedHandler for EchoHandler {
    fn handle(
        &self,
        parts: http::request::Parts,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = http::Response<GateBody>> + Send>> {
        let response = Self::reply(&parts, &body);
        Box::pin(async move { response })
    }
}
