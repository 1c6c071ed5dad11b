//! Metrics and tracing collaborators. Both see each logical request exactly once.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{field, info, info_span, Span};

use crate::classify::ErrorCategory;
use crate::error::CollaboratorError;
use crate::outcome::RequestOutcome;
use crate::request::{Correlation, HttpMethod};

/// Summary handed to the metrics sink after the outcome is final.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestInfo {
    pub operation: String,
    pub method: HttpMethod,
    pub url: String,
    pub correlation: Correlation,
    pub outcome: RequestOutcome,
}

pub trait MetricsSink: Send + Sync {
    fn record_request(&self, info: &RequestInfo) -> Result<(), CollaboratorError>;

    fn flush(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Identity of the span opened for a logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanInfo {
    pub operation: String,
    pub method: HttpMethod,
    pub url: String,
    pub correlation: Correlation,
}

/// Opaque adapter-owned span state returned by `start_span`.
pub struct SpanHandle(Box<dyn Any + Send + Sync>);

impl SpanHandle {
    pub fn new<T: Any + Send + Sync>(state: T) -> Self {
        Self(Box::new(state))
    }

    pub fn downcast<T: Any>(self) -> Option<T> {
        self.0.downcast::<T>().ok().map(|state| *state)
    }
}

impl std::fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SpanHandle(..)")
    }
}

pub trait TracingAdapter: Send + Sync {
    fn start_span(&self, info: &SpanInfo) -> Option<SpanHandle>;

    fn end_span(&self, handle: SpanHandle, outcome: &RequestOutcome);
}

#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_request(&self, _info: &RequestInfo) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopTracing;

impl TracingAdapter for NoopTracing {
    fn start_span(&self, _info: &SpanInfo) -> Option<SpanHandle> {
        None
    }

    fn end_span(&self, _handle: SpanHandle, _outcome: &RequestOutcome) {}
}

/// Emits one `info` event per logical request.
#[derive(Debug, Default)]
pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn record_request(&self, info: &RequestInfo) -> Result<(), CollaboratorError> {
        let outcome = &info.outcome;
        info!(
            operation = %info.operation,
            method = %info.method,
            request_id = %info.correlation.request_id,
            correlation_id = %info.correlation.correlation_id,
            ok = outcome.ok,
            status = outcome.status,
            category = %outcome.category,
            attempts = outcome.attempts,
            duration_ms = outcome.duration_ms,
            from_cache = outcome.from_cache,
            "request finished"
        );
        Ok(())
    }
}

/// Keeps every record in memory; meant for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    records: Mutex<Vec<RequestInfo>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RequestInfo> {
        self.records
            .lock()
            .expect("metrics lock is not poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .expect("metrics lock is not poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_by_category(&self) -> BTreeMap<ErrorCategory, usize> {
        let records = self.records.lock().expect("metrics lock is not poisoned");
        let mut counts = BTreeMap::new();
        for record in records.iter() {
            *counts.entry(record.outcome.category).or_insert(0) += 1;
        }
        counts
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_request(&self, info: &RequestInfo) -> Result<(), CollaboratorError> {
        self.records
            .lock()
            .expect("metrics lock is not poisoned")
            .push(info.clone());
        Ok(())
    }
}

/// Opens a `finx.request` span per logical request and records the outcome on it.
#[derive(Debug, Default)]
pub struct TracingSpans;

impl TracingAdapter for TracingSpans {
    fn start_span(&self, info: &SpanInfo) -> Option<SpanHandle> {
        let span = info_span!(
            "finx.request",
            operation = %info.operation,
            method = %info.method,
            url = %info.url,
            request_id = %info.correlation.request_id,
            correlation_id = %info.correlation.correlation_id,
            ok = field::Empty,
            status = field::Empty,
            category = field::Empty,
            attempts = field::Empty,
            duration_ms = field::Empty,
            from_cache = field::Empty,
        );
        Some(SpanHandle::new(span))
    }

    fn end_span(&self, handle: SpanHandle, outcome: &RequestOutcome) {
        let Some(span) = handle.downcast::<Span>() else {
            return;
        };
        span.record("ok", outcome.ok);
        if let Some(status) = outcome.status {
            span.record("status", status);
        }
        span.record("category", outcome.category.as_str());
        span.record("attempts", outcome.attempts);
        span.record("duration_ms", outcome.duration_ms);
        span.record("from_cache", outcome.from_cache);
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    fn info(category: ErrorCategory) -> RequestInfo {
        let now = OffsetDateTime::now_utc();
        RequestInfo {
            operation: String::from("finra.short_volume"),
            method: HttpMethod::Get,
            url: String::from("https://api.finra.test/data/short"),
            correlation: Correlation {
                request_id: String::from("req-1"),
                correlation_id: String::from("req-1"),
                parent_correlation_id: None,
            },
            outcome: RequestOutcome {
                ok: category == ErrorCategory::None,
                status: Some(200),
                category,
                attempts: 1,
                started_at: now,
                ended_at: now,
                duration_ms: 0,
                from_cache: false,
                rate_limit: None,
            },
        }
    }

    #[test]
    fn in_memory_metrics_counts_by_category() {
        let metrics = InMemoryMetrics::new();
        metrics.record_request(&info(ErrorCategory::Transient)).expect("record");
        metrics.record_request(&info(ErrorCategory::Transient)).expect("record");
        metrics.record_request(&info(ErrorCategory::Validation)).expect("record");

        assert_eq!(metrics.len(), 3);
        let counts = metrics.count_by_category();
        assert_eq!(counts.get(&ErrorCategory::Transient), Some(&2));
        assert_eq!(counts.get(&ErrorCategory::Validation), Some(&1));
    }

    #[test]
    fn span_handle_round_trips_adapter_state() {
        let handle = SpanHandle::new(42_u32);
        assert_eq!(handle.downcast::<u32>(), Some(42));

        let handle = SpanHandle::new(String::from("span"));
        assert_eq!(handle.downcast::<u32>(), None);
    }

    #[test]
    fn tracing_spans_accept_outcomes_without_subscriber() {
        let adapter = TracingSpans;
        let record = info(ErrorCategory::None);
        let handle = adapter
            .start_span(&SpanInfo {
                operation: record.operation.clone(),
                method: record.method,
                url: record.url.clone(),
                correlation: record.correlation.clone(),
            })
            .expect("span handle");
        adapter.end_span(handle, &record.outcome);
    }
}
