//! Attempt classification.
//!
//! Every completed attempt is classified exactly once. A `None` classification of a
//! response means success; anything else becomes a [`ClassifiedError`].
//!
//! | Condition | Category | Retryable by default |
//! |-----------|----------|----------------------|
//! | 401, 403 | `auth` | no |
//! | 400, 404, 422 | `validation` | no |
//! | 402 | `quota` | no |
//! | 429 | `rate_limit` | yes (honours `Retry-After`) |
//! | 408 | `timeout` | yes |
//! | 5xx except 501, 505 | `transient` | yes (honours `Retry-After`) |
//! | aborted transport call | `canceled` | no |
//! | transport timeout | `timeout` | yes |
//! | other transport failure | `network` | yes |
//! | anything else | `unknown` | no |

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use crate::prepare::PreparedRequest;
use crate::transport::{TransportError, TransportErrorKind, TransportResponse};

/// Retry-relevant category of an attempt outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    None,
    Auth,
    Validation,
    Quota,
    RateLimit,
    Timeout,
    Transient,
    Network,
    Canceled,
    Unknown,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Quota => "quota",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Network => "network",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::None => "http.none",
            Self::Auth => "http.auth",
            Self::Validation => "http.validation",
            Self::Quota => "http.quota",
            Self::RateLimit => "http.rate_limit",
            Self::Timeout => "http.timeout",
            Self::Transient => "http.transient",
            Self::Network => "http.network",
            Self::Canceled => "http.canceled",
            Self::Unknown => "http.unknown",
        }
    }

    /// Categories retried when no explicit hint says otherwise.
    pub const fn is_retryable_by_default(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Transient | Self::Network | Self::Timeout
        )
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier hint. An explicit `retryable` always wins over the category default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackHint {
    pub retry_after: Option<Duration>,
    pub retryable: Option<bool>,
}

/// Classified failure of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub status: Option<u16>,
    pub reason: String,
    pub fallback: FallbackHint,
}

impl ClassifiedError {
    pub fn new(category: ErrorCategory, reason: impl Into<String>) -> Self {
        Self {
            category,
            status: None,
            reason: reason.into(),
            fallback: FallbackHint::default(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.fallback.retry_after = retry_after;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.fallback.retryable = Some(retryable);
        self
    }

    pub fn retryable(&self) -> bool {
        self.fallback
            .retryable
            .unwrap_or_else(|| self.category.is_retryable_by_default())
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.fallback.retry_after
    }
}

impl Display for ClassifiedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.category, self.reason),
            None => write!(f, "{}: {}", self.category, self.reason),
        }
    }
}

/// What a finished attempt produced. Never both a response and an error.
#[derive(Debug, Clone, Copy)]
pub enum AttemptResult<'a> {
    Response(&'a TransportResponse),
    Error(&'a TransportError),
}

/// Input shared by every classification call.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub attempt: u32,
    pub request: &'a PreparedRequest,
}

/// Maps a finished attempt to success (`None`) or a [`ClassifiedError`].
pub trait ErrorClassifier: Send + Sync {
    fn classify(
        &self,
        context: &ClassifyContext<'_>,
        result: AttemptResult<'_>,
    ) -> Option<ClassifiedError>;
}

/// Status and transport-failure rules used when no custom classifier is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(
        &self,
        _context: &ClassifyContext<'_>,
        result: AttemptResult<'_>,
    ) -> Option<ClassifiedError> {
        match result {
            AttemptResult::Response(response) => {
                classify_status(response.status, &response.headers)
            }
            AttemptResult::Error(error) => Some(classify_transport_error(error)),
        }
    }
}

/// Classifies a response status. Statuses below 400 are successes.
pub fn classify_status(status: u16, headers: &BTreeMap<String, String>) -> Option<ClassifiedError> {
    if status < 400 {
        return None;
    }

    let classified = match status {
        401 | 403 => ClassifiedError::new(ErrorCategory::Auth, "upstream rejected credentials"),
        400 | 404 | 422 => ClassifiedError::new(ErrorCategory::Validation, "upstream rejected the request"),
        402 => ClassifiedError::new(ErrorCategory::Quota, "upstream quota exhausted"),
        429 => ClassifiedError::new(ErrorCategory::RateLimit, "upstream rate limit reached")
            .with_retry_after(parse_retry_after(headers)),
        408 => ClassifiedError::new(ErrorCategory::Timeout, "upstream timed out waiting for the request"),
        501 | 505 => ClassifiedError::new(ErrorCategory::Unknown, "upstream does not support the request"),
        500..=599 => ClassifiedError::new(ErrorCategory::Transient, "upstream server error")
            .with_retry_after(parse_retry_after(headers)),
        _ => ClassifiedError::new(ErrorCategory::Unknown, "unexpected upstream status"),
    };

    Some(classified.with_status(status))
}

/// Classifies a transport-level failure.
pub fn classify_transport_error(error: &TransportError) -> ClassifiedError {
    let category = match error.kind() {
        TransportErrorKind::Aborted => ErrorCategory::Canceled,
        TransportErrorKind::Timeout => ErrorCategory::Timeout,
        TransportErrorKind::Connect | TransportErrorKind::Other => {
            if mentions_timeout(error.message()) {
                ErrorCategory::Timeout
            } else {
                ErrorCategory::Network
            }
        }
    };

    ClassifiedError::new(category, error.message())
}

fn mentions_timeout(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("timeout") || message.contains("timed out")
}

/// Server-suggested delay from `retry-after-ms` or `retry-after` (seconds or HTTP-date).
pub fn parse_retry_after(headers: &BTreeMap<String, String>) -> Option<Duration> {
    if let Some(millis) = headers
        .get("retry-after-ms")
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
    {
        return Some(saturating_secs(millis / 1_000.0));
    }

    let value = headers.get("retry-after")?.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(saturating_secs(seconds));
        }
        return None;
    }

    let at = OffsetDateTime::parse(value, &Rfc2822).ok()?;
    let wait = at - OffsetDateTime::now_utc();
    Some(Duration::try_from(wait).unwrap_or(Duration::ZERO))
}

/// Non-negative finite seconds that overflow `Duration` clamp to `Duration::MAX`.
fn saturating_secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}
