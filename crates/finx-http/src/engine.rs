//! Request execution engine.
//!
//! One `execute` call owns one logical request: preparation, the cache short-circuit, the
//! attempt loop, cache write-back, then exactly one metrics record and one span.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backoff::retry_delay;
use crate::cache::{Cache, CacheEntry, NoopCache};
use crate::circuit_breaker::{CircuitBreaker, NoopCircuitBreaker};
use crate::classify::{
    AttemptResult, ClassifiedError, ClassifyContext, DefaultClassifier, ErrorCategory,
    ErrorClassifier,
};
use crate::config::EngineConfig;
use crate::error::{CollaboratorError, ConfigError, RequestError, RequestErrorKind};
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::observe::{MetricsSink, NoopMetrics, NoopTracing, RequestInfo, SpanInfo, TracingAdapter};
use crate::outcome::{AttemptContext, RateLimitFeedback, RequestOutcome};
use crate::prepare::{prepare, PreparedRequest};
use crate::rate_limit::{NoopRateLimiter, RateLimiter, ThrottleContext};
use crate::request::{CacheMode, RequestSpec};
use crate::transport::{AbortController, Transport, TransportError, TransportResponse};

/// Deadline used when `overall_timeout` does not fit the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Successful result of a logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub outcome: RequestOutcome,
    pub from_cache: bool,
}

impl EngineResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    pub fn text(&self) -> &str {
        &self.body
    }
}

/// Resilient executor shared by every caller of a client.
///
/// Cloning is cheap; clones share collaborators and shutdown state.
#[derive(Clone)]
pub struct RequestEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    classifier: Arc<dyn ErrorClassifier>,
    interceptors: InterceptorChain,
    cache: Arc<dyn Cache>,
    rate_limiter: Arc<dyn RateLimiter>,
    circuit_breaker: Arc<dyn CircuitBreaker>,
    metrics: Arc<dyn MetricsSink>,
    tracing: Arc<dyn TracingAdapter>,
    closed: AtomicBool,
}

#[derive(Default)]
pub struct RequestEngineBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn Transport>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    interceptors: InterceptorChain,
    cache: Option<Arc<dyn Cache>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    circuit_breaker: Option<Arc<dyn CircuitBreaker>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    tracing: Option<Arc<dyn TracingAdapter>>,
}

impl RequestEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Appends an interceptor; registration order is execution order.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn circuit_breaker(mut self, circuit_breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn tracing(mut self, tracing: Arc<dyn TracingAdapter>) -> Self {
        self.tracing = Some(tracing);
        self
    }

    pub fn build(self) -> Result<RequestEngine, ConfigError> {
        let transport = self.transport.ok_or(ConfigError::MissingTransport)?;

        Ok(RequestEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                transport,
                classifier: self
                    .classifier
                    .unwrap_or_else(|| Arc::new(DefaultClassifier)),
                interceptors: self.interceptors,
                cache: self.cache.unwrap_or_else(|| Arc::new(NoopCache)),
                rate_limiter: self
                    .rate_limiter
                    .unwrap_or_else(|| Arc::new(NoopRateLimiter)),
                circuit_breaker: self
                    .circuit_breaker
                    .unwrap_or_else(|| Arc::new(NoopCircuitBreaker)),
                metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
                tracing: self.tracing.unwrap_or_else(|| Arc::new(NoopTracing)),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

/// How the attempt loop ended.
enum Termination {
    Succeeded {
        response: TransportResponse,
        attempts: u32,
        from_cache: bool,
    },
    Failed(Failure),
}

struct Failure {
    kind: RequestErrorKind,
    category: ErrorCategory,
    status: Option<u16>,
    reason: String,
    attempts: u32,
    headers: BTreeMap<String, String>,
}

impl Failure {
    fn new(
        kind: RequestErrorKind,
        category: ErrorCategory,
        reason: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            kind,
            category,
            status: None,
            reason: reason.into(),
            attempts,
            headers: BTreeMap::new(),
        }
    }

    fn classified(
        classified: ClassifiedError,
        attempts: u32,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind: RequestErrorKind::Classified,
            category: classified.category,
            status: classified.status,
            reason: classified.reason,
            attempts,
            headers,
        }
    }

    fn deadline(reason: impl Into<String>, attempts: u32, last: Option<&LastFailure>) -> Self {
        let mut failure = Self::new(
            RequestErrorKind::DeadlineExceeded,
            ErrorCategory::Timeout,
            reason,
            attempts,
        );
        if let Some(last) = last {
            failure.status = last.status;
            failure.headers = last.headers.clone();
        }
        failure
    }

    fn collaborator(component: &str, error: &CollaboratorError, attempts: u32) -> Self {
        Self::new(
            RequestErrorKind::Collaborator,
            ErrorCategory::Unknown,
            format!("{component} failed closed: {}", error.message()),
            attempts,
        )
    }
}

/// Status and headers of the most recent failed attempt.
struct LastFailure {
    status: Option<u16>,
    headers: BTreeMap<String, String>,
}

impl RequestEngine {
    pub fn builder() -> RequestEngineBuilder {
        RequestEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Marks the engine closed and flushes the metrics sink. Later `execute` calls fail
    /// with [`RequestErrorKind::Shutdown`].
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(error) = self.inner.metrics.flush() {
            warn!(error = %error, "metrics flush failed during shutdown");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Runs one logical request to completion.
    pub async fn execute(&self, spec: RequestSpec) -> Result<EngineResponse, RequestError> {
        if self.is_shut_down() {
            return Err(RequestError::shutdown(spec.operation));
        }

        let operation = spec.operation.clone();
        let prepared = prepare(spec, &self.inner.config)
            .map_err(|error| RequestError::configuration(operation, error))?;

        let started_at = OffsetDateTime::now_utc();
        let started = Instant::now();
        let deadline = started
            .checked_add(prepared.resilience.overall_timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);

        let span = self.inner.tracing.start_span(&SpanInfo {
            operation: prepared.operation().to_owned(),
            method: prepared.method(),
            url: prepared.url().to_owned(),
            correlation: prepared.correlation().clone(),
        });

        let termination = self.run(&prepared, deadline).await;

        let ended_at = OffsetDateTime::now_utc();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = match &termination {
            Termination::Succeeded {
                response,
                attempts,
                from_cache,
            } => RequestOutcome {
                ok: true,
                status: Some(response.status),
                category: ErrorCategory::None,
                attempts: *attempts,
                started_at,
                ended_at,
                duration_ms,
                from_cache: *from_cache,
                rate_limit: RateLimitFeedback::from_headers(&response.headers),
            },
            Termination::Failed(failure) => RequestOutcome {
                ok: false,
                status: failure.status,
                category: failure.category,
                attempts: failure.attempts,
                started_at,
                ended_at,
                duration_ms,
                from_cache: false,
                rate_limit: RateLimitFeedback::from_headers(&failure.headers),
            },
        };

        if let Termination::Succeeded {
            response,
            from_cache: false,
            ..
        } = &termination
        {
            self.write_back(&prepared, response).await;
        }

        let info = RequestInfo {
            operation: prepared.operation().to_owned(),
            method: prepared.method(),
            url: prepared.url().to_owned(),
            correlation: prepared.correlation().clone(),
            outcome: outcome.clone(),
        };
        if let Err(error) = self.inner.metrics.record_request(&info) {
            warn!(
                operation = %prepared.operation(),
                request_id = %prepared.correlation().request_id,
                error = %error,
                "metrics sink failed; outcome not recorded"
            );
        }
        if let Some(handle) = span {
            self.inner.tracing.end_span(handle, &outcome);
        }

        match termination {
            Termination::Succeeded {
                response,
                from_cache,
                ..
            } => Ok(EngineResponse {
                status: response.status,
                headers: response.headers,
                body: response.body,
                outcome,
                from_cache,
            }),
            Termination::Failed(failure) => Err(RequestError::new(
                failure.kind,
                failure.category,
                prepared.operation(),
                failure.reason,
            )
            .with_status(failure.status)
            .with_correlation(prepared.correlation().clone())
            .with_attempts(failure.attempts)
            .with_outcome(outcome)),
        }
    }

    async fn run(&self, prepared: &PreparedRequest, deadline: Instant) -> Termination {
        if let Some(directive) = prepared.cache() {
            if directive.mode == CacheMode::Default {
                match self.cached_response(prepared, &directive.key).await {
                    Ok(Some(response)) => {
                        debug!(
                            operation = %prepared.operation(),
                            request_id = %prepared.correlation().request_id,
                            cache_key = %directive.key,
                            "served from cache"
                        );
                        return Termination::Succeeded {
                            response,
                            attempts: 0,
                            from_cache: true,
                        };
                    }
                    Ok(None) => {}
                    Err(failure) => return Termination::Failed(failure),
                }
            }
        }

        self.attempt_loop(prepared, deadline).await
    }

    async fn cached_response(
        &self,
        prepared: &PreparedRequest,
        key: &str,
    ) -> Result<Option<TransportResponse>, Failure> {
        match self.inner.cache.get(key).await {
            Ok(Some(entry)) if !entry.is_expired() => Ok(Some(entry.value)),
            Ok(Some(_)) => {
                if let Err(error) = self.inner.cache.delete(key).await {
                    warn!(
                        operation = %prepared.operation(),
                        cache_key = key,
                        error = %error,
                        "failed to evict expired cache entry"
                    );
                }
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(error) if error.is_fail_closed() => {
                Err(Failure::collaborator("cache", &error, 0))
            }
            Err(error) => {
                warn!(
                    operation = %prepared.operation(),
                    request_id = %prepared.correlation().request_id,
                    cache_key = key,
                    error = %error,
                    "cache read failed; continuing without cache"
                );
                Ok(None)
            }
        }
    }

    async fn write_back(&self, prepared: &PreparedRequest, response: &TransportResponse) {
        let Some(directive) = prepared.cache() else {
            return;
        };
        if directive.mode == CacheMode::Bypass {
            return;
        }

        let ttl = directive.ttl.unwrap_or_else(|| self.inner.config.cache_ttl());
        let entry = CacheEntry::new(response.clone(), ttl);
        if let Err(error) = self.inner.cache.set(&directive.key, entry).await {
            warn!(
                operation = %prepared.operation(),
                request_id = %prepared.correlation().request_id,
                cache_key = %directive.key,
                error = %error,
                "cache write failed"
            );
        }
    }

    async fn attempt_loop(&self, prepared: &PreparedRequest, deadline: Instant) -> Termination {
        let inner = &self.inner;
        let key = prepared.operation_key();
        let mut last: Option<LastFailure> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let completed = attempt - 1;

            let now = Instant::now();
            if now >= deadline {
                return Termination::Failed(Failure::deadline(
                    format!("overall deadline exceeded before attempt {attempt}"),
                    completed,
                    last.as_ref(),
                ));
            }

            // Interceptor rewrites apply to this attempt only.
            let mut request = prepared.clone();
            let controller = AbortController::new();
            let context = AttemptContext {
                attempt,
                max_attempts: request.resilience.max_attempts,
                deadline_remaining: deadline - now,
                abort: controller.signal(),
            };

            if let Err((name, error)) = inner.interceptors.before_send(&mut request, &context) {
                return Termination::Failed(Failure::new(
                    RequestErrorKind::Interceptor,
                    ErrorCategory::Canceled,
                    format!("interceptor '{name}' denied the request: {}", error.message()),
                    completed,
                ));
            }

            if let Err(denied) = inner.circuit_breaker.before_request(&key) {
                return Termination::Failed(Failure::new(
                    RequestErrorKind::CircuitOpen,
                    ErrorCategory::Transient,
                    denied.to_string(),
                    completed,
                ));
            }

            let throttle_context = ThrottleContext {
                operation: request.operation().to_owned(),
                request_id: request.correlation().request_id.clone(),
                attempt,
                max_suggested_retry_delay: request.resilience.max_suggested_retry_delay,
            };
            match tokio::time::timeout_at(
                deadline,
                inner.rate_limiter.throttle(&key, &throttle_context),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(error)) if error.is_fail_closed() => {
                    return Termination::Failed(Failure::collaborator(
                        "rate limiter",
                        &error,
                        completed,
                    ));
                }
                Ok(Err(error)) => {
                    warn!(
                        operation = %request.operation(),
                        request_id = %request.correlation().request_id,
                        attempt,
                        error = %error,
                        "rate limiter failed; sending without throttling"
                    );
                }
                Err(_) => {
                    return Termination::Failed(Failure::deadline(
                        format!("overall deadline exceeded while throttling attempt {attempt}"),
                        completed,
                        last.as_ref(),
                    ));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Termination::Failed(Failure::deadline(
                    format!("overall deadline exceeded before attempt {attempt}"),
                    completed,
                    last.as_ref(),
                ));
            }
            let (timeout, bounded_by_deadline) = match request.resilience.per_attempt_timeout {
                Some(limit) if limit < remaining => (limit, false),
                _ => (remaining, true),
            };

            debug!(
                operation = %request.operation(),
                request_id = %request.correlation().request_id,
                attempt,
                max_attempts = request.resilience.max_attempts,
                timeout_ms = timeout.as_millis() as u64,
                "sending attempt"
            );

            let send = inner
                .transport
                .send(request.to_transport_request(timeout), controller.signal());
            let (result, timed_out) = match tokio::time::timeout(timeout, send).await {
                Ok(result) => (result, false),
                Err(_) => {
                    controller.abort();
                    let error = TransportError::timeout(format!(
                        "attempt {attempt} timed out after {} ms",
                        timeout.as_millis()
                    ));
                    (Err(error), true)
                }
            };

            let classify_context = ClassifyContext {
                attempt,
                request: &request,
            };
            let verdict = match result {
                Ok(response) => match inner
                    .classifier
                    .classify(&classify_context, AttemptResult::Response(&response))
                {
                    None => Ok(response),
                    Some(mut classified) => {
                        if classified.status.is_none() {
                            classified.status = Some(response.status);
                        }
                        Err((classified, response.headers))
                    }
                },
                Err(error) => {
                    let classified = inner
                        .classifier
                        .classify(&classify_context, AttemptResult::Error(&error))
                        .unwrap_or_else(|| {
                            ClassifiedError::new(ErrorCategory::Unknown, error.to_string())
                        });
                    Err((classified, BTreeMap::new()))
                }
            };

            let (classified, headers) = match verdict {
                Ok(response) => {
                    inner.interceptors.after_response(&request, &response, &context);
                    inner.rate_limiter.on_success(&key, &throttle_context);
                    inner.circuit_breaker.on_success(&key);
                    return Termination::Succeeded {
                        response,
                        attempts: attempt,
                        from_cache: false,
                    };
                }
                Err(failed) => failed,
            };

            debug!(
                operation = %request.operation(),
                request_id = %request.correlation().request_id,
                attempt,
                category = %classified.category,
                status = classified.status,
                reason = %classified.reason,
                "attempt failed"
            );
            inner.interceptors.on_error(&request, &classified, &context);
            inner
                .rate_limiter
                .on_error(&key, &classified, &throttle_context);
            inner.circuit_breaker.on_failure(&key, &classified);

            if timed_out && bounded_by_deadline {
                return Termination::Failed(Failure::deadline(
                    format!("overall deadline exceeded during attempt {attempt}"),
                    attempt,
                    None,
                ));
            }

            let has_key = request.idempotency_key().is_some();
            if !request
                .resilience
                .allows_retry(request.method(), has_key, &classified, attempt)
            {
                return Termination::Failed(Failure::classified(classified, attempt, headers));
            }

            let delay = retry_delay(attempt, &classified, &request.resilience);
            last = Some(LastFailure {
                status: classified.status,
                headers,
            });

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Termination::Failed(Failure::deadline(
                    format!("overall deadline exceeded after attempt {attempt}"),
                    attempt,
                    last.as_ref(),
                ));
            }

            let sleep_for = delay.min(remaining);
            debug!(
                operation = %request.operation(),
                request_id = %request.correlation().request_id,
                attempt,
                delay_ms = sleep_for.as_millis() as u64,
                "scheduling retry"
            );
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::InMemoryMetrics;
    use crate::transport::NoopTransport;

    #[test]
    fn build_requires_transport() {
        let error = RequestEngine::builder()
            .build()
            .err()
            .expect("must fail without transport");
        assert!(matches!(error, ConfigError::MissingTransport));
    }

    #[tokio::test]
    async fn noop_transport_round_trip() {
        let engine = RequestEngine::builder()
            .transport(Arc::new(NoopTransport))
            .build()
            .expect("engine");

        let response = engine
            .execute(RequestSpec::get("iex.status").with_url("https://api.iex.test/status"))
            .await
            .expect("request succeeds");

        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "{}");
        assert_eq!(response.outcome.attempts, 1);
        assert_eq!(response.outcome.category, ErrorCategory::None);
        assert!(!response.from_cache);

        let value: serde_json::Value = response.json().expect("json body");
        assert!(value.as_object().is_some_and(|object| object.is_empty()));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_requests() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let engine = RequestEngine::builder()
            .transport(Arc::new(NoopTransport))
            .metrics(metrics.clone())
            .build()
            .expect("engine");

        engine.shutdown();
        assert!(engine.is_shut_down());

        let error = engine
            .execute(RequestSpec::get("iex.status").with_url("https://api.iex.test/status"))
            .await
            .expect_err("engine is closed");
        assert_eq!(error.kind(), RequestErrorKind::Shutdown);
        assert_eq!(error.code(), "request.shutdown");
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn configuration_errors_emit_no_metrics() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let engine = RequestEngine::builder()
            .transport(Arc::new(NoopTransport))
            .metrics(metrics.clone())
            .build()
            .expect("engine");

        let error = engine
            .execute(RequestSpec::get("iex.status"))
            .await
            .expect_err("no target");
        assert_eq!(error.kind(), RequestErrorKind::Configuration);
        assert!(metrics.is_empty());
    }
}
