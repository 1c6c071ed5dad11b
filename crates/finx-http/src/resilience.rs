//! Resilience profiles and the retry policy.
//!
//! A profile is resolved per logical request by layering overrides on top of the
//! hard-coded fallback: request override > operation default > client default > fallback.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::ClassifiedError;
use crate::request::HttpMethod;

/// Fully resolved retry, timeout and backoff settings for one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceProfile {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub retry_enabled: bool,
    pub per_attempt_timeout: Option<Duration>,
    pub overall_timeout: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Multiplicative jitter spread in `[0, 1]`.
    pub jitter_factor: f64,
    /// GET, HEAD and OPTIONS retry without an idempotency key.
    pub retry_safe_methods: bool,
    /// PUT and DELETE count as idempotent. Off unless the caller opts in.
    pub idempotent_put_delete: bool,
    /// Every method counts as idempotent for this request.
    pub assume_idempotent: bool,
    /// Upper bound on a server-suggested `Retry-After` delay.
    pub max_suggested_retry_delay: Duration,
}

impl Default for ResilienceProfile {
    fn default() -> Self {
        Self::fallback()
    }
}

impl ResilienceProfile {
    /// Hard-coded fallback. A single attempt: nothing retries unless configured to.
    pub fn fallback() -> Self {
        Self {
            max_attempts: 1,
            retry_enabled: true,
            per_attempt_timeout: None,
            overall_timeout: Duration::from_secs(30),
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(3),
            jitter_factor: 0.5,
            retry_safe_methods: true,
            idempotent_put_delete: false,
            assume_idempotent: false,
            max_suggested_retry_delay: Duration::from_secs(60),
        }
    }

    /// Resolves a profile from overrides ordered lowest to highest precedence.
    pub fn resolve<'a>(layers: impl IntoIterator<Item = &'a ResilienceOverride>) -> Self {
        let mut profile = Self::fallback();
        for layer in layers {
            profile.apply(layer);
        }
        profile.normalize();
        profile
    }

    /// Applies every field set on `layer`.
    pub fn apply(&mut self, layer: &ResilienceOverride) {
        if let Some(value) = layer.max_attempts {
            self.max_attempts = value;
        }
        if let Some(value) = layer.retry_enabled {
            self.retry_enabled = value;
        }
        if let Some(value) = layer.per_attempt_timeout_ms {
            self.per_attempt_timeout = Some(Duration::from_millis(value));
        }
        if let Some(value) = layer.overall_timeout_ms {
            self.overall_timeout = Duration::from_millis(value);
        }
        if let Some(value) = layer.base_backoff_ms {
            self.base_backoff = Duration::from_millis(value);
        }
        if let Some(value) = layer.max_backoff_ms {
            self.max_backoff = Duration::from_millis(value);
        }
        if let Some(value) = layer.jitter_factor {
            self.jitter_factor = value;
        }
        if let Some(value) = layer.retry_safe_methods {
            self.retry_safe_methods = value;
        }
        if let Some(value) = layer.idempotent_put_delete {
            self.idempotent_put_delete = value;
        }
        if let Some(value) = layer.assume_idempotent {
            self.assume_idempotent = value;
        }
        if let Some(value) = layer.max_suggested_retry_delay_ms {
            self.max_suggested_retry_delay = Duration::from_millis(value);
        }
    }

    fn normalize(&mut self) {
        self.max_attempts = self.max_attempts.max(1);
        self.jitter_factor = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    /// Whether `method` may be repeated under this profile.
    pub fn is_idempotent(&self, method: HttpMethod, has_idempotency_key: bool) -> bool {
        if self.assume_idempotent || has_idempotency_key {
            return true;
        }

        match method {
            HttpMethod::Get | HttpMethod::Head | HttpMethod::Options => self.retry_safe_methods,
            HttpMethod::Put | HttpMethod::Delete => self.idempotent_put_delete,
            HttpMethod::Post | HttpMethod::Patch => false,
        }
    }

    /// Retry decision after failed attempt `attempt` (1-based), ignoring the deadline.
    ///
    /// An explicit `retryable` hint on the classification overrides the category default
    /// and, when `true`, also lifts the idempotency requirement.
    pub fn allows_retry(
        &self,
        method: HttpMethod,
        has_idempotency_key: bool,
        classified: &ClassifiedError,
        attempt: u32,
    ) -> bool {
        if !self.retry_enabled || attempt >= self.max_attempts {
            return false;
        }

        if !classified.retryable() {
            return false;
        }

        classified.fallback.retryable == Some(true)
            || self.is_idempotent(method, has_idempotency_key)
    }
}

/// Partial profile used for client, operation and request level overrides.
///
/// Durations are integer milliseconds so the type maps directly onto config files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_attempt_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_backoff_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_safe_methods: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent_put_delete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assume_idempotent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_suggested_retry_delay_ms: Option<u64>,
}

impl ResilienceOverride {
    pub fn max_attempts(mut self, value: u32) -> Self {
        self.max_attempts = Some(value);
        self
    }

    pub fn retry_enabled(mut self, value: bool) -> Self {
        self.retry_enabled = Some(value);
        self
    }

    pub fn per_attempt_timeout(mut self, value: Duration) -> Self {
        self.per_attempt_timeout_ms = Some(duration_ms(value));
        self
    }

    pub fn overall_timeout(mut self, value: Duration) -> Self {
        self.overall_timeout_ms = Some(duration_ms(value));
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff_ms = Some(duration_ms(base));
        self.max_backoff_ms = Some(duration_ms(max));
        self
    }

    pub fn jitter_factor(mut self, value: f64) -> Self {
        self.jitter_factor = Some(value);
        self
    }

    pub fn retry_safe_methods(mut self, value: bool) -> Self {
        self.retry_safe_methods = Some(value);
        self
    }

    pub fn idempotent_put_delete(mut self, value: bool) -> Self {
        self.idempotent_put_delete = Some(value);
        self
    }

    pub fn assume_idempotent(mut self, value: bool) -> Self {
        self.assume_idempotent = Some(value);
        self
    }

    pub fn max_suggested_retry_delay(mut self, value: Duration) -> Self {
        self.max_suggested_retry_delay_ms = Some(duration_ms(value));
        self
    }
}

fn duration_ms(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassifiedError, ErrorCategory};

    #[test]
    fn fallback_never_retries_silently() {
        let profile = ResilienceProfile::resolve([&ResilienceOverride::default()]);
        let classified = ClassifiedError::new(ErrorCategory::Transient, "503");

        assert_eq!(profile.max_attempts, 1);
        assert!(!profile.allows_retry(HttpMethod::Get, false, &classified, 1));
    }

    #[test]
    fn later_layers_take_precedence() {
        let client = ResilienceOverride::default().max_attempts(2).jitter_factor(0.1);
        let operation = ResilienceOverride::default().max_attempts(4);
        let request = ResilienceOverride::default().max_attempts(6);

        let profile = ResilienceProfile::resolve([&client, &operation, &request]);
        assert_eq!(profile.max_attempts, 6);
        assert_eq!(profile.jitter_factor, 0.1);

        let profile = ResilienceProfile::resolve([&client, &operation]);
        assert_eq!(profile.max_attempts, 4);
    }

    #[test]
    fn resolve_clamps_out_of_range_values() {
        let layer = ResilienceOverride::default().max_attempts(0).jitter_factor(3.0);
        let profile = ResilienceProfile::resolve([&layer]);

        assert_eq!(profile.max_attempts, 1);
        assert_eq!(profile.jitter_factor, 1.0);
    }

    #[test]
    fn put_and_delete_require_opt_in() {
        let profile = ResilienceProfile::fallback();
        assert!(!profile.is_idempotent(HttpMethod::Put, false));
        assert!(!profile.is_idempotent(HttpMethod::Delete, false));
        assert!(profile.is_idempotent(HttpMethod::Put, true));

        let profile = ResilienceProfile::resolve([&ResilienceOverride::default()
            .idempotent_put_delete(true)]);
        assert!(profile.is_idempotent(HttpMethod::Delete, false));
        assert!(!profile.is_idempotent(HttpMethod::Post, false));
    }

    #[test]
    fn post_without_key_is_not_retried_unless_hint_forces_it() {
        let profile = ResilienceProfile::resolve([&ResilienceOverride::default().max_attempts(3)]);
        let transient = ClassifiedError::new(ErrorCategory::Transient, "502");

        assert!(!profile.allows_retry(HttpMethod::Post, false, &transient, 1));
        assert!(profile.allows_retry(HttpMethod::Post, true, &transient, 1));

        let forced = ClassifiedError::new(ErrorCategory::Unknown, "custom").with_retryable(true);
        assert!(profile.allows_retry(HttpMethod::Post, false, &forced, 1));
    }

    #[test]
    fn hint_can_veto_a_retryable_category() {
        let profile = ResilienceProfile::resolve([&ResilienceOverride::default().max_attempts(3)]);
        let vetoed = ClassifiedError::new(ErrorCategory::Transient, "503").with_retryable(false);

        assert!(!profile.allows_retry(HttpMethod::Get, false, &vetoed, 1));
    }

    #[test]
    fn attempts_and_switch_bound_retries() {
        let profile = ResilienceProfile::resolve([&ResilienceOverride::default().max_attempts(2)]);
        let network = ClassifiedError::new(ErrorCategory::Network, "reset");

        assert!(profile.allows_retry(HttpMethod::Get, false, &network, 1));
        assert!(!profile.allows_retry(HttpMethod::Get, false, &network, 2));

        let disabled = ResilienceProfile::resolve([&ResilienceOverride::default()
            .max_attempts(5)
            .retry_enabled(false)]);
        assert!(!disabled.allows_retry(HttpMethod::Get, false, &network, 1));
    }

    #[test]
    fn override_deserializes_from_millis() {
        let layer: ResilienceOverride =
            serde_json::from_str(r#"{"max_attempts":3,"per_attempt_timeout_ms":1500}"#)
                .expect("valid override");

        let profile = ResilienceProfile::resolve([&layer]);
        assert_eq!(profile.per_attempt_timeout, Some(Duration::from_millis(1500)));
    }
}
