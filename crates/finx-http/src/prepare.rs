//! Request preparation: id assignment, header and profile merging, url resolution.
//!
//! Preparation is synchronous and runs before any collaborator is touched, so a
//! malformed request never reaches the network.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::request::{Body, CacheDirective, Correlation, HttpMethod, QueryValue, RequestSpec};
use crate::resilience::ResilienceProfile;
use crate::transport::TransportRequest;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const PARENT_CORRELATION_ID_HEADER: &str = "x-parent-correlation-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Fully resolved request.
///
/// Interceptors receive a per-attempt copy and may rewrite headers, body and resilience;
/// the target and correlation identity are fixed for the whole logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    method: HttpMethod,
    url: String,
    operation: String,
    correlation: Correlation,
    idempotency_key: Option<String>,
    cache: Option<CacheDirective>,
    extensions: BTreeMap<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Body>,
    pub resilience: ResilienceProfile,
}

impl PreparedRequest {
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Key shared with the rate limiter and circuit breaker: method plus operation.
    pub fn operation_key(&self) -> String {
        format!("{} {}", self.method, self.operation)
    }

    pub fn correlation(&self) -> &Correlation {
        &self.correlation
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn cache(&self) -> Option<&CacheDirective> {
        self.cache.as_ref()
    }

    pub fn extensions(&self) -> &BTreeMap<String, Value> {
        &self.extensions
    }

    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.extensions.get(name)
    }

    pub fn is_idempotent(&self) -> bool {
        self.resilience
            .is_idempotent(self.method, self.idempotency_key.is_some())
    }

    pub(crate) fn to_transport_request(&self, timeout: Duration) -> TransportRequest {
        TransportRequest {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout,
        }
    }
}

/// Resolves `spec` against the client configuration.
pub fn prepare(spec: RequestSpec, config: &EngineConfig) -> Result<PreparedRequest, ConfigError> {
    let RequestSpec {
        method,
        operation,
        url,
        base_url,
        path,
        query,
        headers: spec_headers,
        body,
        correlation: ids,
        resilience,
        idempotency_key,
        cache,
        extensions,
    } = spec;

    let operation = operation.trim().to_owned();
    if operation.is_empty() {
        return Err(ConfigError::EmptyOperation);
    }

    let url = match (url, path) {
        (None, None) => return Err(ConfigError::MissingTarget),
        (Some(_), Some(_)) => return Err(ConfigError::AmbiguousTarget),
        (Some(url), None) => {
            if !query.is_empty() {
                return Err(ConfigError::QueryWithAbsoluteUrl);
            }
            ensure_absolute(&url)?;
            url
        }
        (None, Some(path)) => {
            let base = base_url
                .or_else(|| config.base_url.clone())
                .ok_or_else(|| ConfigError::MissingBaseUrl { path: path.clone() })?;
            ensure_absolute(&base)?;
            resolve_path_url(&base, &path, &query)
        }
    };

    if let Some(directive) = &cache {
        if directive.key.trim().is_empty() {
            return Err(ConfigError::EmptyCacheKey);
        }
    }

    let request_id = ids
        .request_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let correlation = Correlation {
        correlation_id: ids
            .correlation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| request_id.clone()),
        request_id,
        parent_correlation_id: ids.parent_correlation_id,
    };

    let mut headers = BTreeMap::new();
    for (name, value) in config.default_headers.iter().chain(spec_headers.iter()) {
        insert_header(&mut headers, name, value)?;
    }
    if let Some(user_agent) = &config.user_agent {
        if !headers.contains_key("user-agent") {
            insert_header(&mut headers, "user-agent", user_agent)?;
        }
    }
    headers
        .entry(String::from(REQUEST_ID_HEADER))
        .or_insert_with(|| correlation.request_id.clone());
    headers
        .entry(String::from(CORRELATION_ID_HEADER))
        .or_insert_with(|| correlation.correlation_id.clone());
    if let Some(parent) = &correlation.parent_correlation_id {
        headers
            .entry(String::from(PARENT_CORRELATION_ID_HEADER))
            .or_insert_with(|| parent.clone());
    }
    if let Some(key) = &idempotency_key {
        headers
            .entry(String::from(IDEMPOTENCY_KEY_HEADER))
            .or_insert_with(|| key.clone());
    }

    let resilience = config.resilience_for(&operation, &resilience);

    Ok(PreparedRequest {
        method,
        url,
        operation,
        correlation,
        idempotency_key,
        cache,
        extensions,
        headers,
        body,
        resilience,
    })
}

fn ensure_absolute(url: &str) -> Result<(), ConfigError> {
    let lower = url.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));

    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            value: url.to_owned(),
        }),
    }
}

fn insert_header(
    headers: &mut BTreeMap<String, String>,
    name: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let normalized = name.trim().to_ascii_lowercase();
    if normalized.is_empty()
        || normalized
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control() || ch == ':')
    {
        return Err(ConfigError::InvalidHeaderName {
            name: name.to_owned(),
        });
    }
    if value.chars().any(|ch| ch.is_control() && ch != '\t') {
        return Err(ConfigError::InvalidHeaderValue { name: normalized });
    }

    headers.insert(normalized, value.to_owned());
    Ok(())
}

/// Joins base and path with exactly one slash and appends the encoded query.
pub fn resolve_path_url(base: &str, path: &str, query: &[(String, QueryValue)]) -> String {
    let base = base.trim();
    let path = path.trim();

    let mut url = if path.is_empty() {
        base.to_owned()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let encoded = encode_query(query);
    if !encoded.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&encoded);
    }

    url
}

/// Percent-encodes query pairs; lists repeat the key and absent values are dropped.
pub fn encode_query(query: &[(String, QueryValue)]) -> String {
    let mut pairs = Vec::new();
    for (key, value) in query {
        let key = urlencoding::encode(key);
        match value {
            QueryValue::One(value) => {
                pairs.push(format!("{key}={}", urlencoding::encode(value)));
            }
            QueryValue::Many(values) => {
                for value in values {
                    pairs.push(format!("{key}={}", urlencoding::encode(value)));
                }
            }
            QueryValue::Absent => {}
        }
    }
    pairs.join("&")
}
