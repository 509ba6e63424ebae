//! Server configuration, driven by environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::info;

use hmac_gate_auth::{
    FileSecretStore, GateConfig, SecretStore, StaticSecretStore, parse_strip_list,
};
use hmac_gate_http::GateHttpConfig;

/// Complete configuration for the server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub gateway_listen: String,
    /// Log level filter, used when `RUST_LOG` is unset.
    pub log_level: String,
    /// JSON secrets file; when unset, secrets come from `HMAC_SECRETS`.
    pub secrets_file: Option<PathBuf>,
    /// Inline `caller=secret` pairs, comma-separated.
    pub inline_secrets: Vec<(String, String)>,
    /// URI fragments canonicalized without their scheme.
    pub protocol_strip_list: Vec<String>,
    /// Gate settings.
    pub gate: GateConfig,
    /// HTTP layer settings.
    pub http: GateHttpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gateway_listen: "0.0.0.0:8080".to_owned(),
            log_level: "info".to_owned(),
            secrets_file: None,
            inline_secrets: Vec::new(),
            protocol_strip_list: Vec::new(),
            gate: GateConfig::default(),
            http: GateHttpConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            gate: GateConfig::from_vars(&lookup),
            ..Self::default()
        };

        if let Some(v) = lookup("GATEWAY_LISTEN") {
            config.gateway_listen = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = lookup("HMAC_SECRETS_FILE") {
            if !v.trim().is_empty() {
                config.secrets_file = Some(PathBuf::from(v.trim()));
            }
        }
        if let Some(v) = lookup("HMAC_SECRETS") {
            config.inline_secrets = parse_inline_secrets(&v);
        }
        if let Some(v) = lookup("HMAC_PROTOCOL_STRIP_LIST") {
            config.protocol_strip_list = parse_strip_list(&v);
        }
        if let Some(v) = lookup("HMAC_ALLOW_ANONYMOUS") {
            config.http.allow_anonymous = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("HMAC_DEFAULT_SCHEME") {
            if !v.trim().is_empty() {
                config.http.default_scheme = v.trim().to_lowercase();
            }
        }

        config
    }

    /// Build the secret store selected by this configuration.
    ///
    /// A secrets file is read once here so that a missing or malformed file
    /// stops startup instead of rejecting every caller.
    pub fn build_secret_store(&self) -> Result<ConfiguredSecretStore> {
        if let Some(path) = &self.secrets_file {
            if !self.inline_secrets.is_empty() {
                bail!("set either HMAC_SECRETS_FILE or HMAC_SECRETS, not both");
            }
            let store = FileSecretStore::new(path.clone())
                .with_strip_list(self.protocol_strip_list.clone());
            let table = store.load().context("invalid HMAC_SECRETS_FILE")?;
            info!(
                path = %path.display(),
                callers = table.len(),
                "using file-backed secret store"
            );
            return Ok(ConfiguredSecretStore::File(store));
        }

        info!(callers = self.inline_secrets.len(), "using inline secret store");
        let store = StaticSecretStore::new(self.inline_secrets.clone())
            .with_strip_list(self.protocol_strip_list.clone());
        Ok(ConfiguredSecretStore::Inline(store))
    }
}

/// Secret store selected by [`ServerConfig::build_secret_store`].
#[derive(Debug)]
pub enum ConfiguredSecretStore {
    /// Secrets read from `HMAC_SECRETS_FILE`.
    File(FileSecretStore),
    /// Secrets given inline through `HMAC_SECRETS`.
    Inline(StaticSecretStore),
}

impl SecretStore for ConfiguredSecretStore {
    fn resolve_secret(&self, caller_id: &str) -> Option<String> {
        match self {
            Self::File(store) => store.resolve_secret(caller_id),
            Self::Inline(store) => store.resolve_secret(caller_id),
        }
    }

    fn protocol_strip_list(&self) -> Vec<String> {
        match self {
            Self::File(store) => store.protocol_strip_list(),
            Self::Inline(store) => store.protocol_strip_list(),
        }
    }
}

/// Parse `caller=secret` pairs separated by commas.
///
/// Secrets are base64 and may themselves end in `=`, so only the first `=`
/// separates caller from secret.
fn parse_inline_secrets(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(caller, _)| !caller.trim().is_empty())
        .map(|(caller, secret)| (caller.trim().to_owned(), secret.trim().to_owned()))
        .collect()
}
