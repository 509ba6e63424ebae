//! Secret lookup for signature verification.
//!
//! A [`SecretStore`] maps caller identifiers to their shared secrets and
//! lists the URI fragments for which scheme-stripped canonicalization applies.
//! Stores are shared across request tasks, so implementations must be
//! `Send + Sync` and safe under concurrent first access.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SecretStoreError;

/// Source of per-caller secrets.
pub trait SecretStore: Send + Sync {
    /// Resolve the secret for `caller_id`.
    ///
    /// `None` and an empty string are both treated as an unknown caller.
    fn resolve_secret(&self, caller_id: &str) -> Option<String>;

    /// URI fragments whose requests are canonicalized without the scheme.
    fn protocol_strip_list(&self) -> Vec<String>;
}

impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    fn resolve_secret(&self, caller_id: &str) -> Option<String> {
        (**self).resolve_secret(caller_id)
    }

    fn protocol_strip_list(&self) -> Vec<String> {
        (**self).protocol_strip_list()
    }
}

/// Split a comma-separated strip list, dropping blank entries.
///
/// Entries are lower-cased because they are matched against the lower-cased
/// request URI.
#[must_use]
pub fn parse_strip_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn normalize_strip_list(entries: impl IntoIterator<Item = String>) -> Vec<String> {
    entries
        .into_iter()
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// In-memory secret table.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
    strip_list: Vec<String>,
}

impl StaticSecretStore {
    /// Create a store from `(caller_id, secret)` pairs.
    pub fn new(secrets: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            secrets: secrets.into_iter().collect(),
            strip_list: Vec::new(),
        }
    }

    /// Set the protocol-strip list. Entries are trimmed and lower-cased.
    #[must_use]
    pub fn with_strip_list(mut self, strip_list: Vec<String>) -> Self {
        self.strip_list = normalize_strip_list(strip_list);
        self
    }

    /// Number of configured callers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether no callers are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl SecretStore for StaticSecretStore {
    fn resolve_secret(&self, caller_id: &str) -> Option<String> {
        self.secrets.get(caller_id).cloned()
    }

    fn protocol_strip_list(&self) -> Vec<String> {
        self.strip_list.clone()
    }
}

/// On-disk layout of a secrets file.
///
/// ```json
/// {
///   "secrets": { "alice": "base64-key" },
///   "protocol_strip_list": ["api.example.com"]
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
struct SecretsFile {
    #[serde(default)]
    secrets: HashMap<String, String>,
    #[serde(default)]
    protocol_strip_list: Vec<String>,
}

/// Secret store backed by a JSON file, loaded on first use and cached.
///
/// The cache is filled under a write lock with a second check, so concurrent
/// first requests read the file once. A failed load is not cached: lookups
/// see an empty table and the next lookup retries.
/// [`invalidate`](Self::invalidate) drops the cache; the next lookup reloads.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    extra_strip_list: Vec<String>,
    cache: RwLock<Option<Arc<StaticSecretStore>>>,
    #[cfg(test)]
    loads: std::sync::atomic::AtomicUsize,
}

impl FileSecretStore {
    /// Create a store reading from `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extra_strip_list: Vec::new(),
            cache: RwLock::new(None),
            #[cfg(test)]
            loads: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Additional strip-list entries merged with those in the file.
    ///
    /// Entries are trimmed and lower-cased.
    #[must_use]
    pub fn with_strip_list(mut self, strip_list: Vec<String>) -> Self {
        self.extra_strip_list = normalize_strip_list(strip_list);
        self
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the file, bypassing the cache.
    pub fn load(&self) -> Result<StaticSecretStore, SecretStoreError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| SecretStoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        let SecretsFile {
            secrets,
            protocol_strip_list,
        } = serde_json::from_str(&raw).map_err(|source| SecretStoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let mut strip_list = normalize_strip_list(protocol_strip_list);
        strip_list.extend(self.extra_strip_list.iter().cloned());

        debug!(
            path = %self.path.display(),
            callers = secrets.len(),
            "loaded secrets file"
        );

        Ok(StaticSecretStore::new(secrets).with_strip_list(strip_list))
    }

    /// Drop the cached table so the next lookup reloads the file.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    fn table(&self) -> Arc<StaticSecretStore> {
        if let Some(table) = self.cache.read().as_ref() {
            return Arc::clone(table);
        }

        let mut cache = self.cache.write();
        if let Some(table) = cache.as_ref() {
            return Arc::clone(table);
        }

        #[cfg(test)]
        self.loads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        match self.load() {
            Ok(table) => {
                let table = Arc::new(table);
                *cache = Some(Arc::clone(&table));
                table
            }
            Err(e) => {
                warn!(error = %e, "secrets file unavailable, treating all callers as unknown");
                Arc::new(
                    StaticSecretStore::default().with_strip_list(self.extra_strip_list.clone()),
                )
            }
        }
    }
}

impl SecretStore for FileSecretStore {
    fn resolve_secret(&self, caller_id: &str) -> Option<String> {
        self.table().resolve_secret(caller_id)
    }

    fn protocol_strip_list(&self) -> Vec<String> {
        self.table().protocol_strip_list()
    }
}
