//! Delay computation between a failed retryable attempt and the next one.

use std::time::Duration;

use crate::classify::ClassifiedError;
use crate::resilience::ResilienceProfile;

/// Exponential backoff with multiplicative jitter.
///
/// The delay after failed attempt `n` is `min(base * 2^(n-1) * j, max)` where `j` is
/// drawn uniformly from `[1 - jitter_factor, 1 + jitter_factor]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter_factor: f64,
}

impl Backoff {
    pub fn from_profile(profile: &ResilienceProfile) -> Self {
        Self {
            base: profile.base_backoff,
            max: profile.max_backoff,
            jitter_factor: profile.jitter_factor,
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay(self, attempt: u32) -> Duration {
        self.delay_with_sample(attempt, fastrand::f64())
    }

    /// Deterministic variant; `sample` in `[0, 1)` picks the jitter multiplier.
    pub fn delay_with_sample(self, attempt: u32, sample: f64) -> Duration {
        let jitter_factor = self.jitter_factor.clamp(0.0, 1.0);
        let multiplier = 1.0 - jitter_factor + 2.0 * jitter_factor * sample.clamp(0.0, 1.0);

        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let seconds = self.base.as_secs_f64() * 2_f64.powi(exponent) * multiplier;
        let capped_seconds = seconds.min(self.max.as_secs_f64()).max(0.0);

        Duration::try_from_secs_f64(capped_seconds).unwrap_or(self.max)
    }
}

/// Sleep before the attempt after `attempt`.
///
/// A server-suggested delay is honoured up to `max_suggested_retry_delay`; otherwise the
/// profile's exponential backoff applies.
pub fn retry_delay(
    attempt: u32,
    classified: &ClassifiedError,
    profile: &ResilienceProfile,
) -> Duration {
    match classified.retry_after() {
        Some(suggested) => suggested.min(profile.max_suggested_retry_delay),
        None => Backoff::from_profile(profile).delay(attempt),
    }
}
