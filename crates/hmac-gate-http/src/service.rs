//! Hyper `Service` that authenticates requests before handing them on.

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;
use http::header::HOST;
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use tracing::{debug, warn};

use hmac_gate_auth::{AuthOutcome, AuthenticationGate, SecretStore, SignedRequest};

use crate::handler::GatedHandler;
use crate::response::{
    GateBody, add_challenge_on_unauthorized, bad_request, challenge_header, unauthorized,
};

/// Message returned when credentials are required but absent.
const CREDENTIALS_REQUIRED: &str = "authentication required";

/// Configuration for the HTTP layer around the gate.
#[derive(Debug, Clone)]
pub struct GateHttpConfig {
    /// Admit requests that carry no credentials for this scheme.
    ///
    /// When false, such requests are answered with `401` and a challenge.
    pub allow_anonymous: bool,
    /// Scheme used to rebuild absolute URIs when neither the request line nor
    /// `X-Forwarded-Proto` names one.
    pub default_scheme: String,
}

impl Default for GateHttpConfig {
    fn default() -> Self {
        Self {
            allow_anonymous: false,
            default_scheme: "http".to_owned(),
        }
    }
}

/// Hyper service that runs every request through an [`AuthenticationGate`].
#[derive(Debug)]
pub struct GateHttpService<S, H> {
    gate: Arc<AuthenticationGate<S>>,
    handler: Arc<H>,
    config: Arc<GateHttpConfig>,
    challenge: HeaderValue,
}

impl<S: SecretStore, H: GatedHandler> GateHttpService<S, H> {
    /// Create a new service.
    pub fn new(gate: AuthenticationGate<S>, handler: Arc<H>, config: GateHttpConfig) -> Self {
        let challenge = challenge_header(&gate.challenge());
        Self {
            gate: Arc::new(gate),
            handler,
            config: Arc::new(config),
            challenge,
        }
    }
}

impl<S, H> Clone for GateHttpService<S, H> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
            handler: Arc::clone(&self.handler),
            config: Arc::clone(&self.config),
            challenge: self.challenge.clone(),
        }
    }
}

impl<S, H> hyper::service::Service<http::Request<Incoming>> for GateHttpService<S, H>
where
    S: SecretStore + 'static,
    H: GatedHandler,
{
    type Response = http::Response<GateBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let svc = self.clone();
        Box::pin(async move { Ok(svc.process(req).await) })
    }
}

impl<S: SecretStore, H: GatedHandler> GateHttpService<S, H> {
    /// Run one request through the full pipeline.
    ///
    /// 1. Buffer the body.
    /// 2. Rebuild the absolute URI the client signed.
    /// 3. Authenticate; rejections become `401` with a challenge.
    /// 4. Hand the request head, the [`AuthContext`](hmac_gate_auth::AuthContext),
    ///    and the same body bytes to the handler.
    pub async fn process<B>(&self, req: http::Request<B>) -> http::Response<GateBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let (mut parts, incoming) = req.into_parts();

        let body = match incoming.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                return bad_request(format!("failed to read request body: {e}"));
            }
        };

        let uri = absolute_uri(&parts, &self.config.default_scheme);
        let signed = SignedRequest::from_parts(&parts, uri, body.clone());
        let decision = self.gate.authenticate(&signed);

        match &decision.outcome {
            AuthOutcome::Rejected(rejection) => {
                return unauthorized(&self.challenge, rejection.message());
            }
            AuthOutcome::MissingCredentials if !self.config.allow_anonymous => {
                debug!(method = %parts.method, uri = %parts.uri, "request without credentials");
                return unauthorized(&self.challenge, CREDENTIALS_REQUIRED);
            }
            _ => {}
        }

        parts.extensions.insert(decision.context);
        let response = self.handler.handle(parts, body).await;
        add_challenge_on_unauthorized(response, &self.challenge)
    }
}

/// Rebuild the absolute URI of a request.
///
/// Server-side requests usually carry only the origin-form path, while the
/// client signed the full URI. The scheme comes from the request line, then
/// `X-Forwarded-Proto`, then `default_scheme`; the authority from the request
/// line, then `Host`.
#[must_use]
pub fn absolute_uri(parts: &http::request::Parts, default_scheme: &str) -> String {
    if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
        return parts.uri.to_string();
    }

    let path = parts
        .uri
        .path_and_query()
        .map_or("/", http::uri::PathAndQuery::as_str);

    let Some(host) = parts
        .uri
        .authority()
        .map(http::uri::Authority::as_str)
        .or_else(|| parts.headers.get(HOST).and_then(|v| v.to_str().ok()))
    else {
        return path.to_owned();
    };

    let scheme = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_scheme);

    format!("{scheme}://{host}{path}")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use http::StatusCode;
    use http::header::WWW_AUTHENTICATE;
    use http_body_util::Full;

    use hmac_gate_auth::{
        ANONYMOUS_CALLER_ID, GateConfig, SIGNATURE_SCHEME, StaticSecretStore, sign,
    };

    use super::*;
    use crate::handler::caller_id;
    use crate::response::body_from_string;

    /// Echoes `<caller>:<body>`, or answers 401 for the path `/deny`.
    struct EchoHandler;

    impl GatedHandler for EchoHandler {
        fn handle(
            &self,
            parts: http::request::Parts,
            body: Bytes,
        ) -> Pin<Box<dyn Future<Output = http::Response<GateBody>> + Send>> {
            let caller = caller_id(&parts).unwrap_or("-").to_owned();
            let deny = parts.uri.path() == "/deny";
            Box::pin(async move {
                let text = format!("{caller}:{}", String::from_utf8_lossy(&body));
                let mut resp = http::Response::new(body_from_string(text));
                if deny {
                    *resp.status_mut() = StatusCode::UNAUTHORIZED;
                }
                resp
            })
        }
    }

    fn service(
        gate_config: GateConfig,
        http_config: GateHttpConfig,
    ) -> GateHttpService<StaticSecretStore, EchoHandler> {
        let store = StaticSecretStore::new(vec![("alice".to_owned(), "k1".to_owned())]);
        GateHttpService::new(
            AuthenticationGate::new(gate_config, store),
            Arc::new(EchoHandler),
            http_config,
        )
    }

    /// Sign as a client would, then convert to an origin-form server request.
    fn signed_request(path: &str, body: &str, secret: &str) -> http::Request<Full<Bytes>> {
        let client = SignedRequest::new(http::Method::POST, format!("http://api.local{path}"))
            .with_body(body.to_owned());
        let client = sign(client, "alice", secret, false).unwrap();

        let mut builder = http::Request::builder()
            .method(http::Method::POST)
            .uri(path)
            .header(HOST, "api.local");
        for (name, value) in client.headers() {
            builder = builder.header(name, value);
        }
        builder.body(Full::new(client.body().clone())).unwrap()
    }

    async fn read_body(resp: http::Response<GateBody>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_should_pass_buffered_body_and_caller_to_handler() {
        let svc = service(GateConfig::default(), GateHttpConfig::default());
        let resp = svc
            .process(signed_request("/items", "{\"n\":1}", "k1"))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_body(resp).await, "alice:{\"n\":1}");
    }

    #[tokio::test]
    async fn test_should_admit_request_signed_for_bare_authority() {
        let client = SignedRequest::new(http::Method::GET, "http://api.local");
        let client = sign(client, "alice", "k1", false).unwrap();
        let (client_parts, body) = client.into_http().unwrap().into_parts();

        let mut builder = http::Request::builder()
            .method(client_parts.method)
            .uri(client_parts.uri.path_and_query().unwrap().as_str())
            .header(HOST, client_parts.uri.host().unwrap());
        for (name, value) in &client_parts.headers {
            builder = builder.header(name, value);
        }
        let wire = builder.body(Full::new(body)).unwrap();
        assert_eq!(wire.uri(), "/");

        let svc = service(GateConfig::default(), GateHttpConfig::default());
        let resp = svc.process(wire).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_body(resp).await, "alice:");
    }

    #[tokio::test]
    async fn test_should_reject_bad_signature_with_challenge() {
        let gate_config = GateConfig {
            realm: Some("api".to_owned()),
            ..GateConfig::default()
        };
        let svc = service(gate_config, GateHttpConfig::default());
        let resp = svc.process(signed_request("/items", "x", "wrong")).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()[WWW_AUTHENTICATE],
            "WebAPI-Security-HMAC-Scheme realm=\"api\""
        );
        assert_eq!(read_body(resp).await, "invalid or expired signature");
    }

    #[tokio::test]
    async fn test_should_require_credentials_unless_anonymous_allowed() {
        let unsigned = || {
            http::Request::builder()
                .uri("/items")
                .header(HOST, "api.local")
                .body(Full::new(Bytes::from_static(b"x")))
                .unwrap()
        };

        let strict = service(GateConfig::default(), GateHttpConfig::default());
        let resp = strict.process(unsigned()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[WWW_AUTHENTICATE], SIGNATURE_SCHEME);
        assert_eq!(read_body(resp).await, CREDENTIALS_REQUIRED);

        let lenient = service(
            GateConfig::default(),
            GateHttpConfig {
                allow_anonymous: true,
                ..GateHttpConfig::default()
            },
        );
        let resp = lenient.process(unsigned()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_body(resp).await, "-:x");
    }

    #[tokio::test]
    async fn test_should_admit_everything_as_placeholder_when_disabled() {
        let gate_config = GateConfig {
            enabled: false,
            ..GateConfig::default()
        };
        let svc = service(gate_config, GateHttpConfig::default());
        let resp = svc.process(signed_request("/items", "x", "wrong")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_body(resp).await, format!("{ANONYMOUS_CALLER_ID}:x"));
    }

    #[tokio::test]
    async fn test_should_challenge_handler_unauthorized_responses() {
        let svc = service(GateConfig::default(), GateHttpConfig::default());
        let resp = svc.process(signed_request("/deny", "", "k1")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[WWW_AUTHENTICATE], SIGNATURE_SCHEME);
    }

    #[tokio::test]
    async fn test_should_return_rejection_reason_as_plain_text() {
        let svc = service(GateConfig::default(), GateHttpConfig::default());
        let req = http::Request::builder()
            .uri("/items")
            .header(HOST, "api.local")
            .header(http::header::AUTHORIZATION, SIGNATURE_SCHEME)
            .header(http::header::DATE, Utc::now().to_rfc2822())
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = svc.process(req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()[http::header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(read_body(resp).await, "token missing");
    }

    #[test]
    fn test_should_rebuild_absolute_uri_from_host() {
        let (parts, ()) = http::Request::builder()
            .uri("/a/b?c=d")
            .header(HOST, "api.local:8080")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(absolute_uri(&parts, "http"), "http://api.local:8080/a/b?c=d");
    }

    #[test]
    fn test_should_prefer_forwarded_proto() {
        let (parts, ()) = http::Request::builder()
            .uri("/a")
            .header(HOST, "api.local")
            .header("x-forwarded-proto", "https, http")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(absolute_uri(&parts, "http"), "https://api.local/a");
    }

    #[test]
    fn test_should_keep_absolute_form_uri() {
        let (parts, ()) = http::Request::builder()
            .uri("https://api.local/a")
            .header(HOST, "other")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(absolute_uri(&parts, "http"), "https://api.local/a");
    }

    #[test]
    fn test_should_fall_back_to_path_without_host() {
        let (parts, ()) = http::Request::builder()
            .uri("/a")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(absolute_uri(&parts, "http"), "/a");
    }
}
