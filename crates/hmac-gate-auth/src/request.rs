//! The minimal request shape the signing scheme operates on.
//!
//! [`SignedRequest`] holds only what canonicalization and the authentication
//! decision need: method, absolute URI, headers, and the fully buffered body.
//! The body is a [`Bytes`] handle, so cloning the request (or handing the body
//! to a downstream handler) never copies or consumes the payload.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{AUTHORIZATION, DATE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::error::SignatureError;

/// Header carrying the caller identifier.
pub const CALLER_ID_HEADER: HeaderName = HeaderName::from_static("webapi-security-hmac-userid");

/// Authentication scheme token used in `Authorization` and `WWW-Authenticate`.
pub const SIGNATURE_SCHEME: &str = "WebAPI-Security-HMAC-Scheme";

/// RFC 1123 date format used both on the wire and in the canonical string.
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a timestamp as an RFC 1123 HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
#[must_use]
pub fn format_http_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP `Date` header value into a UTC timestamp.
#[must_use]
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Bring a request URI into the form used for canonicalization.
///
/// Absolute URIs always carry a path, so `http://host` and `http://host/`
/// sign identically; this matches the origin-form `/` a server receives.
/// Values that do not parse as a URI are kept verbatim.
#[must_use]
pub fn normalize_uri(raw: &str) -> String {
    let Ok(uri) = raw.parse::<Uri>() else {
        return raw.to_owned();
    };
    let path_and_query = uri
        .path_and_query()
        .map_or("/", http::uri::PathAndQuery::as_str);
    let path_and_query = if path_and_query.starts_with('/') {
        path_and_query.to_owned()
    } else {
        format!("/{path_and_query}")
    };

    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => format!("{scheme}://{authority}{path_and_query}"),
        _ if uri.path_and_query().is_some() => path_and_query,
        _ => raw.to_owned(),
    }
}

/// A parsed `Authorization` header: `<scheme> <parameter>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorization<'a> {
    /// The scheme token.
    pub scheme: &'a str,
    /// The credentials following the scheme; empty when absent.
    pub parameter: &'a str,
}

impl<'a> Authorization<'a> {
    /// Split a raw header value into scheme and parameter.
    #[must_use]
    pub fn parse(value: &'a str) -> Self {
        let value = value.trim();
        match value.split_once(' ') {
            Some((scheme, parameter)) => Self {
                scheme,
                parameter: parameter.trim(),
            },
            None => Self {
                scheme: value,
                parameter: "",
            },
        }
    }
}

/// A request as seen by the signer and the verifier.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

impl SignedRequest {
    /// Create a request with no headers and an empty body.
    ///
    /// The URI is normalized with [`normalize_uri`].
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: normalize_uri(&uri.into()),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Build a request from `http` parts, an absolute URI, and a buffered body.
    ///
    /// The URI is passed separately because server-side requests usually
    /// carry only the origin-form path; the caller reconstructs the absolute
    /// form the client signed.
    #[must_use]
    pub fn from_parts(parts: &http::request::Parts, uri: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: parts.method.clone(),
            uri: normalize_uri(&uri.into()),
            headers: parts.headers.clone(),
            body,
        }
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Absolute request URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The buffered body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The request timestamp taken from the `Date` header.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.headers
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
    }

    /// Set the `Date` header, replacing any existing value.
    pub fn set_timestamp(&mut self, timestamp: &DateTime<Utc>) -> Result<(), SignatureError> {
        let value = HeaderValue::try_from(format_http_date(timestamp))
            .map_err(|_| SignatureError::InvalidHeaderValue("date"))?;
        self.headers.insert(DATE, value);
        Ok(())
    }

    /// The first caller-identifier header value.
    ///
    /// `None` means the header is absent. A present header whose value is not
    /// visible ASCII is reported as an empty identifier.
    #[must_use]
    pub fn caller_id(&self) -> Option<&str> {
        self.headers
            .get(CALLER_ID_HEADER)
            .map(|v| v.to_str().unwrap_or_default())
    }

    /// The parsed `Authorization` header, if present and readable.
    #[must_use]
    pub fn authorization(&self) -> Option<Authorization<'_>> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(Authorization::parse)
    }

    /// Convert into an outbound `http::Request`, e.g. for a signing client.
    pub fn into_http(self) -> Result<http::Request<Bytes>, http::Error> {
        let mut builder = http::Request::builder()
            .method(self.method)
            .uri(self.uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers;
        }
        builder.body(self.body)
    }
}
