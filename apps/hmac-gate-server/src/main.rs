//! HmacGate Server - HTTP server that admits only HMAC-signed requests.
//!
//! Every request passes through the authentication gate before it reaches
//! the echo handler, which reports the admitted caller back as JSON.
//!
//! # Usage
//!
//! ```text
//! HMAC_SECRETS=alice=<key> hmac-gate-server
//! hmac-gate-server generate-key
//! hmac-gate-server sign <caller-id> <secret> <method> <uri> [body]
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_LISTEN` | `0.0.0.0:8080` | Bind address |
//! | `HMAC_ENABLED` | `true` | Only `false` disables authentication |
//! | `HMAC_SIGNATURE_TIMEOUT` | `600` | Replay window in seconds |
//! | `HMAC_REALM` | *(unset)* | Realm advertised in `WWW-Authenticate` |
//! | `HMAC_DEBUG_DIAGNOSTICS` | `false` | Attach signing diagnostics to rejections |
//! | `HMAC_ALLOW_ANONYMOUS` | `false` | Admit requests without credentials |
//! | `HMAC_SECRETS_FILE` | *(unset)* | JSON file of caller secrets |
//! | `HMAC_SECRETS` | *(unset)* | Inline `caller=secret` pairs, comma-separated |
//! | `HMAC_PROTOCOL_STRIP_LIST` | *(empty)* | URI fragments signed without their scheme |
//! | `HMAC_DEFAULT_SCHEME` | `http` | Scheme assumed when rebuilding request URIs |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

mod config;
mod echo;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hmac_gate_auth::{
    AuthenticationGate, CALLER_ID_HEADER, SignedRequest, generate_secret_key, sign,
};
use hmac_gate_http::GateHttpService;

use crate::config::{ConfiguredSecretStore, ServerConfig};
use crate::echo::EchoHandler;

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

type GateService = GateHttpService<ConfiguredSecretStore, EchoHandler>;

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Run the accept loop, serving connections until `shutdown` resolves.
async fn serve(
    listener: TcpListener,
    service: GateService,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.clone();
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

/// Produce the headers a client must send for the given request.
///
/// Arguments: caller id, secret, method, absolute URI, optional body.
fn signed_headers(args: &[String], strip_list: &[String]) -> Result<Vec<(String, String)>> {
    let [caller, secret, method, uri, rest @ ..] = args else {
        bail!("usage: sign <caller-id> <secret> <method> <uri> [body]");
    };

    let method: http::Method = method
        .parse()
        .with_context(|| format!("invalid method: {method}"))?;
    let body = rest.first().cloned().unwrap_or_default();
    let strip = strip_list
        .iter()
        .any(|entry| uri.to_lowercase().contains(entry.as_str()));

    let request = SignedRequest::new(method, uri.as_str()).with_body(Bytes::from(body));
    let request = sign(request, caller, secret, strip).context("failed to sign request")?;

    let headers = [http::header::DATE, http::header::AUTHORIZATION, CALLER_ID_HEADER]
        .into_iter()
        .filter_map(|name| {
            let value = request.headers().get(&name)?.to_str().ok()?.to_owned();
            Some((name.as_str().to_owned(), value))
        })
        .collect();
    Ok(headers)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("generate-key") => {
            println!("{}", generate_secret_key());
            return Ok(());
        }
        Some("sign") => {
            for (name, value) in signed_headers(&args[1..], &config.protocol_strip_list)? {
                println!("{name}: {value}");
            }
            return Ok(());
        }
        Some(other) => bail!("unknown command: {other}"),
        None => {}
    }

    init_tracing(&config.log_level)?;

    let store = config.build_secret_store()?;
    info!(
        enabled = config.gate.enabled,
        timeout_seconds = config.gate.timeout_seconds,
        allow_anonymous = config.http.allow_anonymous,
        debug_diagnostics = config.gate.debug_diagnostics,
        "initializing authentication gate",
    );
    if !config.gate.enabled {
        warn!("HMAC authentication is disabled, all requests will be admitted");
    }

    let gate = AuthenticationGate::new(config.gate.clone(), store);
    let service = GateHttpService::new(gate, Arc::new(EchoHandler), config.http.clone());

    let addr: SocketAddr = config
        .gateway_listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.gateway_listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, version = VERSION, "starting HmacGate Server");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };

    serve(listener, service, shutdown).await
}
