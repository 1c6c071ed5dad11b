//! # Finx HTTP
//!
//! Resilient request execution for the finx ingestion platform.
//!
//! ## Overview
//!
//! One [`RequestEngine::execute`] call runs one logical request end to end:
//!
//! - **Preparation** resolves the target, headers, correlation ids and resilience profile
//! - **Cache short-circuit** serves fresh entries without touching the network
//! - **Attempt loop** runs interceptors, circuit breaker, rate limiter, transport and
//!   classification, then retries with backoff inside the overall deadline
//! - **Observation** emits exactly one metrics record and one span per logical request
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backoff`] | Exponential backoff with jitter and server-suggested delays |
//! | [`cache`] | Cache contract and in-memory TTL cache |
//! | [`circuit_breaker`] | Breaker contract and keyed closed/open/half-open breaker |
//! | [`classify`] | Error categories and the default status/transport classifier |
//! | [`config`] | Client configuration, loadable from JSON |
//! | [`engine`] | The engine, its builder and response type |
//! | [`error`] | Configuration, collaborator, interceptor and terminal request errors |
//! | [`interceptor`] | Interceptor contract, chain and built-in interceptors |
//! | [`observe`] | Metrics sink and tracing adapter contracts with default sinks |
//! | [`outcome`] | Request outcome, rate-limit feedback and per-attempt context |
//! | [`prepare`] | Request preparation |
//! | [`rate_limit`] | Rate limiter contract and keyed `governor` limiter |
//! | [`request`] | Caller-facing request description |
//! | [`resilience`] | Resilience profiles and layered overrides |
//! | [`transport`] | Transport contract, abort signals and the `reqwest` transport |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use finx_http::{EngineConfig, RequestEngine, RequestSpec, ReqwestTransport, ResilienceOverride};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = RequestEngine::builder()
//!         .config(EngineConfig::default().with_base_url("https://cdn.finra.org/equity"))
//!         .transport(Arc::new(ReqwestTransport::new()))
//!         .build()?;
//!
//!     let response = engine
//!         .execute(
//!             RequestSpec::get("finra.short_volume")
//!                 .with_path("regsho/daily")
//!                 .with_query("date", "20240105")
//!                 .with_resilience(ResilienceOverride::default().max_attempts(3)),
//!         )
//!         .await?;
//!
//!     println!("{} after {} attempts", response.status, response.outcome.attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Terminal failures are a single [`RequestError`] carrying kind, category, status,
//! attempt count and correlation ids:
//!
//! ```rust
//! use finx_http::{ErrorCategory, RequestError, RequestErrorKind};
//!
//! fn handle_error(error: RequestError) {
//!     match (error.kind(), error.category()) {
//!         (RequestErrorKind::Classified, ErrorCategory::RateLimit) => {
//!             // Upstream budget exhausted after retries
//!         }
//!         (RequestErrorKind::DeadlineExceeded, _) => {
//!             // Overall budget spent
//!         }
//!         (RequestErrorKind::Configuration, _) => {
//!             // Report to user
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod interceptor;
pub mod observe;
pub mod outcome;
pub mod prepare;
pub mod rate_limit;
pub mod request;
pub mod resilience;
pub mod transport;

// Backoff
pub use backoff::{retry_delay, Backoff};

// Caching
pub use cache::{Cache, CacheEntry, MemoryCache, NoopCache};

// Circuit breaker
pub use circuit_breaker::{
    BreakerDenied, CircuitBreaker, CircuitBreakerConfig, CircuitState, KeyedCircuitBreaker,
    NoopCircuitBreaker,
};

// Classification
pub use classify::{
    classify_status, classify_transport_error, parse_retry_after, AttemptResult, ClassifiedError,
    ClassifyContext, DefaultClassifier, ErrorCategory, ErrorClassifier, FallbackHint,
};

// Configuration
pub use config::{EngineConfig, DEFAULT_CACHE_TTL_MS};

// Engine
pub use engine::{EngineResponse, RequestEngine, RequestEngineBuilder};

// Error types
pub use error::{CollaboratorError, ConfigError, InterceptorError, RequestError, RequestErrorKind};

// Interceptors
pub use interceptor::{HttpAuth, Interceptor, InterceptorChain, JsonBody, StaticHeaders};

// Observation
pub use observe::{
    InMemoryMetrics, LogMetricsSink, MetricsSink, NoopMetrics, NoopTracing, RequestInfo,
    SpanHandle, SpanInfo, TracingAdapter, TracingSpans,
};

// Outcome types
pub use outcome::{AttemptContext, BudgetFeedback, RateLimitFeedback, RequestOutcome};

// Preparation
pub use prepare::{prepare, PreparedRequest};

// Rate limiting
pub use rate_limit::{GovernorRateLimiter, NoopRateLimiter, RateLimiter, ThrottleContext};

// Request model
pub use request::{
    Body, CacheDirective, CacheMode, Correlation, CorrelationIds, HttpMethod, QueryValue,
    RequestSpec,
};

// Resilience
pub use resilience::{ResilienceOverride, ResilienceProfile};

// Transport
pub use transport::{
    AbortController, AbortSignal, BoxFuture, NoopTransport, ReqwestTransport, Transport,
    TransportError, TransportErrorKind, TransportRequest, TransportResponse,
};
