//! Caller-facing request model.
//!
//! A [`RequestSpec`] describes one logical request. It is consumed by a single
//! [`crate::RequestEngine::execute`] call; retries reuse the prepared form, never the spec.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::resilience::ResilienceOverride;

/// HTTP methods accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const ALL: [Self; 7] = [
        Self::Get,
        Self::Head,
        Self::Options,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// GET, HEAD and OPTIONS: safe to repeat without an idempotency key.
    pub const fn is_safe(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(ConfigError::InvalidMethod {
                value: value.to_owned(),
            }),
        }
    }
}

/// One query parameter value. Lists expand to repeated keys, `Absent` is omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
    Absent,
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::One(value.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl<T: Into<String>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, |value| Self::One(value.into()))
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values)
    }
}

/// Opaque request payload. The engine never serializes it; interceptors or the
/// transport do.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl Body {
    /// Wire bytes for the payload. JSON values are rendered compactly.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Json(value) => serde_json::to_vec(value),
            Self::Text(text) => Ok(text.as_bytes().to_vec()),
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// How the cache collaborator is consulted for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Serve a fresh entry if present, otherwise fetch and write back.
    #[default]
    Default,
    /// Neither read nor write the cache.
    Bypass,
    /// Skip the read, fetch, and write back.
    Refresh,
}

impl FromStr for CacheMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "bypass" => Ok(Self::Bypass),
            "refresh" => Ok(Self::Refresh),
            _ => Err(ConfigError::InvalidCacheMode {
                value: value.to_owned(),
            }),
        }
    }
}

/// Cache key and mode for a request. `ttl` overrides the engine default on write-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirective {
    pub key: String,
    pub mode: CacheMode,
    pub ttl: Option<Duration>,
}

impl CacheDirective {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mode: CacheMode::Default,
            ttl: None,
        }
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Caller-supplied correlation identifiers; missing ones are generated during preparation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationIds {
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub parent_correlation_id: Option<String>,
}

/// Resolved correlation identity, shared by every attempt of a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub request_id: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_correlation_id: Option<String>,
}

/// Description of one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub operation: String,
    pub url: Option<String>,
    pub base_url: Option<String>,
    pub path: Option<String>,
    pub query: Vec<(String, QueryValue)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Body>,
    pub correlation: CorrelationIds,
    pub resilience: ResilienceOverride,
    pub idempotency_key: Option<String>,
    pub cache: Option<CacheDirective>,
    pub extensions: BTreeMap<String, Value>,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, operation: impl Into<String>) -> Self {
        Self {
            method,
            operation: operation.into(),
            url: None,
            base_url: None,
            path: None,
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            correlation: CorrelationIds::default(),
            resilience: ResilienceOverride::default(),
            idempotency_key: None,
            cache: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn get(operation: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, operation)
    }

    pub fn post(operation: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, operation)
    }

    /// Absolute target, used as-is.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Path target, resolved against the request or client base url.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_json(self, value: Value) -> Self {
        self.with_body(Body::Json(value))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.correlation.request_id = Some(request_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_parent_correlation_id(mut self, parent: impl Into<String>) -> Self {
        self.correlation.parent_correlation_id = Some(parent.into());
        self
    }

    pub fn with_resilience(mut self, resilience: ResilienceOverride) -> Self {
        self.resilience = resilience;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_cache(mut self, cache: CacheDirective) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(name.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>().expect("valid"), HttpMethod::Get);
        assert_eq!(
            " Delete ".parse::<HttpMethod>().expect("valid"),
            HttpMethod::Delete
        );
        assert!(matches!(
            "TRACE".parse::<HttpMethod>(),
            Err(ConfigError::InvalidMethod { .. })
        ));
    }

    #[test]
    fn only_get_head_options_are_safe() {
        let safe = HttpMethod::ALL
            .iter()
            .filter(|method| method.is_safe())
            .count();
        assert_eq!(safe, 3);
        assert!(!HttpMethod::Put.is_safe());
    }

    #[test]
    fn headers_are_normalized_and_last_write_wins() {
        let spec = RequestSpec::get("iex.quote")
            .with_header("X-Api-Key", "first")
            .with_header("x-api-key", "second");

        assert_eq!(spec.headers.len(), 1);
        assert_eq!(
            spec.headers.get("x-api-key").map(String::as_str),
            Some("second")
        );
    }

    #[test]
    fn optional_query_values_convert_to_absent() {
        let spec = RequestSpec::get("finra.otc")
            .with_query("symbol", "AAPL")
            .with_query("cursor", None::<String>);

        assert_eq!(spec.query[1].1, QueryValue::Absent);
    }

    #[test]
    fn json_body_renders_compact_bytes() {
        let body = Body::Json(serde_json::json!({ "symbol": "MSFT" }));
        assert_eq!(body.to_bytes().expect("serializable"), br#"{"symbol":"MSFT"}"#);
    }
}
