//! Error types for request signing and secret storage.
//!
//! Verification never produces an error: every failed check resolves to a
//! rejection outcome. These errors only surface when *creating* a signature
//! with unusable inputs, or when a secret backend cannot be read.

use std::path::PathBuf;

/// Errors raised while creating a signature.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The secret key is empty or whitespace-only.
    #[error("caller has no secret key")]
    EmptySecret,

    /// The request carries no (parseable) `Date` header.
    #[error("request must carry a Date header")]
    MissingTimestamp,

    /// A computed header value could not be encoded as an HTTP header.
    #[error("invalid header value for {0}")]
    InvalidHeaderValue(&'static str),
}

/// Errors raised by file-backed secret stores.
#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    /// The secrets file could not be read.
    #[error("failed to read secrets file {path}: {source}")]
    Io {
        /// Path of the secrets file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The secrets file is not valid JSON of the expected shape.
    #[error("failed to parse secrets file {path}: {source}")]
    Parse {
        /// Path of the secrets file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}
