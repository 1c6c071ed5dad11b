use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota};
use tokio::time::Instant;
use tracing::debug;

use crate::classify::{ClassifiedError, ErrorCategory};
use crate::error::CollaboratorError;
use crate::transport::BoxFuture;

/// Identity of the attempt being throttled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleContext {
    pub operation: String,
    pub request_id: String,
    pub attempt: u32,
    /// Cap on server-suggested delays for this request; cooldowns never outlast it.
    pub max_suggested_retry_delay: Duration,
}

/// Client-side rate limiter consulted before every attempt.
///
/// `throttle` may suspend; it must never block a worker thread.
pub trait RateLimiter: Send + Sync {
    fn throttle<'a>(
        &'a self,
        key: &'a str,
        context: &'a ThrottleContext,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>>;

    fn on_success(&self, key: &str, context: &ThrottleContext) {
        let _ = (key, context);
    }

    fn on_error(&self, key: &str, error: &ClassifiedError, context: &ThrottleContext) {
        let _ = (key, error, context);
    }
}

/// Limiter that never waits.
#[derive(Debug, Default)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn throttle<'a>(
        &'a self,
        key: &'a str,
        context: &'a ThrottleContext,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        let _ = (key, context);
        Box::pin(async { Ok(()) })
    }
}

/// In-process keyed limiter: one `governor` quota per operation key, plus a cooldown
/// installed by upstream `rate_limit` responses carrying a retry hint.
#[derive(Clone)]
pub struct GovernorRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
    cooldowns: Arc<Mutex<HashMap<String, Instant>>>,
}

impl GovernorRateLimiter {
    /// Allows `quota_limit` requests per `quota_window` for each key.
    pub fn new(quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            limiter: Arc::new(DefaultKeyedRateLimiter::keyed(quota_from_window(
                quota_window,
                quota_limit,
            ))),
            cooldowns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Tries to take budget without waiting. Returns `false` when the key is exhausted.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.cooldown_remaining(key).is_none() && self.limiter.check_key(&key.to_owned()).is_ok()
    }

    pub fn cooldown_remaining(&self, key: &str) -> Option<Duration> {
        let cooldowns = self
            .cooldowns
            .lock()
            .expect("cooldown map should not be poisoned");
        cooldowns
            .get(key)
            .map(|until| until.saturating_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }
}

impl RateLimiter for GovernorRateLimiter {
    fn throttle<'a>(
        &'a self,
        key: &'a str,
        context: &'a ThrottleContext,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move {
            if let Some(wait) = self.cooldown_remaining(key) {
                debug!(
                    key,
                    request_id = %context.request_id,
                    wait_ms = wait.as_millis() as u64,
                    "waiting for upstream rate-limit cooldown"
                );
                tokio::time::sleep(wait).await;
            }

            self.limiter.until_key_ready(&key.to_owned()).await;
            Ok(())
        })
    }

    fn on_success(&self, key: &str, _context: &ThrottleContext) {
        self.cooldowns
            .lock()
            .expect("cooldown map should not be poisoned")
            .remove(key);
    }

    fn on_error(&self, key: &str, error: &ClassifiedError, context: &ThrottleContext) {
        if error.category != ErrorCategory::RateLimit {
            return;
        }
        let Some(retry_after) = error.retry_after() else {
            return;
        };

        let wait = retry_after.min(context.max_suggested_retry_delay);
        let Some(until) = Instant::now().checked_add(wait) else {
            debug!(key, wait_ms = wait.as_millis() as u64, "cooldown beyond clock range; ignored");
            return;
        };

        self.cooldowns
            .lock()
            .expect("cooldown map should not be poisoned")
            .insert(key.to_owned(), until);
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
