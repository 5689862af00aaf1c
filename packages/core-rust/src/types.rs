//! Shared domain types used on both the consumer and provider sides.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Certificate-bound identity of a system participating in the local cloud.
///
/// The system name is derived from the leaf certificate's subject common
/// name at startup; address and port come from configuration. The identity
/// is established once and never changes for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Name the system is known by in the registry and orchestrator.
    pub system_name: String,
    /// Address other systems use to reach this one.
    pub address: String,
    /// Port other systems use to reach this one.
    pub port: u16,
}

impl Identity {
    /// Creates an identity from its parts.
    #[must_use]
    pub fn new(system_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            system_name: system_name.into(),
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.system_name, self.address, self.port)
    }
}

/// Security level of a registered service, as carried on the wire.
///
/// Serialized as the registry's `SCREAMING_SNAKE_CASE` strings
/// (`"NOT_SECURE"`, `"CERTIFICATE"`, `"TOKEN"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    /// Plain transport, no peer verification.
    #[default]
    NotSecure,
    /// Mutual TLS only.
    Certificate,
    /// Mutual TLS plus a per-call bearer token.
    Token,
}

impl SecurityLevel {
    /// Wire representation of the level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotSecure => "NOT_SECURE",
            Self::Certificate => "CERTIFICATE",
            Self::Token => "TOKEN",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method a service binding is exposed under.
///
/// A deliberately closed set: the registry only understands these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Wire representation, matching the registry's `http-method` metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Parses the registry's `http-method` metadata value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for http::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

/// Parameters of a service call: query parameters plus an optional payload.
///
/// The payload is opaque bytes end to end; consumers typically fill it with
/// JSON via [`Params::json`], and payload-taking handlers decode it back.
#[derive(Debug, Clone, Default)]
pub struct Params {
    /// Query parameters appended to the service URI, in order.
    pub query_params: Vec<(String, String)>,
    /// Optional request body.
    pub payload: Option<Bytes>,
}

impl Params {
    /// Parameters with no query string and no payload.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parameters carrying a JSON-encoded payload.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if `value` cannot be
    /// serialized.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            query_params: Vec::new(),
            payload: Some(Bytes::from(serde_json::to_vec(value)?)),
        })
    }

    /// Adds a query parameter, builder style.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }
}
