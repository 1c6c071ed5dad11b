use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::classify::ErrorCategory;
use crate::transport::AbortSignal;

/// Final record of one logical request. Built once, after the attempt loop ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub category: ErrorCategory,
    /// Network attempts made; zero for cache hits.
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    pub duration_ms: u64,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitFeedback>,
}

/// Remaining/limit/reset for one upstream budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetFeedback {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    /// Raw reset value; providers disagree on its unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<String>,
}

impl BudgetFeedback {
    fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset.is_none()
    }
}

/// Rate-limit headers surfaced by the final response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitFeedback {
    pub requests: BudgetFeedback,
    pub tokens: BudgetFeedback,
}

impl RateLimitFeedback {
    /// Reads `x-ratelimit-*-requests`, `x-ratelimit-*-tokens` and the unsuffixed
    /// `x-ratelimit-*` headers (request budget). Returns `None` when none are present.
    pub fn from_headers(headers: &BTreeMap<String, String>) -> Option<Self> {
        let budget = |suffix: &str| -> BudgetFeedback {
            let header = |field: &str| headers.get(&format!("x-ratelimit-{field}{suffix}"));
            BudgetFeedback {
                limit: header("limit").and_then(|value| value.trim().parse().ok()),
                remaining: header("remaining").and_then(|value| value.trim().parse().ok()),
                reset: header("reset").map(|value| value.trim().to_owned()),
            }
        };

        let mut requests = budget("-requests");
        if requests.is_empty() {
            requests = budget("");
        }
        let tokens = budget("-tokens");

        if requests.is_empty() && tokens.is_empty() {
            return None;
        }

        Some(Self { requests, tokens })
    }
}

/// Ephemeral per-attempt state handed to interceptors and classifiers.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    pub deadline_remaining: Duration,
    pub abort: AbortSignal,
}
