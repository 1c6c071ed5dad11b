//! Client-construction configuration.
//!
//! The engine never reads the environment; callers build an [`EngineConfig`] in code
//! or load one from a JSON file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::resilience::{ResilienceOverride, ResilienceProfile};

/// Default write-back TTL for cached responses: five minutes.
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Base url for path targets that carry no base of their own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub default_headers: BTreeMap<String, String>,
    /// Client-level resilience defaults.
    pub default_resilience: ResilienceOverride,
    /// Operation-level resilience defaults keyed by operation name.
    pub operations: BTreeMap<String, ResilienceOverride>,
    pub cache_ttl_ms: u64,
    /// Sent as `user-agent` unless the request sets its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_headers: BTreeMap::new(),
            default_resilience: ResilienceOverride::default(),
            operations: BTreeMap::new(),
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            user_agent: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(value: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(value)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_default_resilience(mut self, resilience: ResilienceOverride) -> Self {
        self.default_resilience = resilience;
        self
    }

    pub fn with_operation(
        mut self,
        operation: impl Into<String>,
        resilience: ResilienceOverride,
    ) -> Self {
        self.operations.insert(operation.into(), resilience);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Resolves the profile for `operation` with `request` applied last.
    pub fn resilience_for(
        &self,
        operation: &str,
        request: &ResilienceOverride,
    ) -> ResilienceProfile {
        let mut layers = vec![&self.default_resilience];
        if let Some(operation_default) = self.operations.get(operation) {
            layers.push(operation_default);
        }
        layers.push(request);
        ResilienceProfile::resolve(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn operation_defaults_sit_between_client_and_request() {
        let config = EngineConfig::default()
            .with_default_resilience(ResilienceOverride::default().max_attempts(2))
            .with_operation(
                "finra.short_volume",
                ResilienceOverride::default().max_attempts(4).retry_enabled(true),
            );

        let profile = config.resilience_for("finra.short_volume", &ResilienceOverride::default());
        assert_eq!(profile.max_attempts, 4);

        let profile = config.resilience_for(
            "finra.short_volume",
            &ResilienceOverride::default().max_attempts(7),
        );
        assert_eq!(profile.max_attempts, 7);

        let profile = config.resilience_for("sec.filings", &ResilienceOverride::default());
        assert_eq!(profile.max_attempts, 2);
    }

    #[test]
    fn loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{
                "base_url": "https://api.iex.test/v1",
                "default_headers": {{ "accept": "application/json" }},
                "default_resilience": {{ "max_attempts": 3, "overall_timeout_ms": 5000 }},
                "operations": {{ "iex.quote": {{ "per_attempt_timeout_ms": 750 }} }}
            }}"#
        )
        .expect("write config");

        let config = EngineConfig::from_path(file.path()).expect("config should load");
        assert_eq!(config.base_url.as_deref(), Some("https://api.iex.test/v1"));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));

        let profile = config.resilience_for("iex.quote", &ResilienceOverride::default());
        assert_eq!(profile.max_attempts, 3);
        assert_eq!(profile.overall_timeout, Duration::from_secs(5));
        assert_eq!(profile.per_attempt_timeout, Some(Duration::from_millis(750)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = EngineConfig::from_json_str(r#"{ "retries": 3 }"#).expect_err("must fail");
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let error = EngineConfig::from_path("/definitely/not/here.json").expect_err("must fail");
        assert!(matches!(error, ConfigError::Read { .. }));
        assert!(error.to_string().contains("/definitely/not/here.json"));
    }
}
