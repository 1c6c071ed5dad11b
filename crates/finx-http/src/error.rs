use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use thiserror::Error;

use crate::classify::ErrorCategory;
use crate::outcome::RequestOutcome;
use crate::request::Correlation;

/// Malformed requests and client configuration, raised before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("request has no target: set either an absolute url or a path")]
    MissingTarget,
    #[error("request has both an absolute url and a path; exactly one target form is allowed")]
    AmbiguousTarget,
    #[error("query parameters require a path target, not an absolute url")]
    QueryWithAbsoluteUrl,
    #[error("url must be absolute http(s): '{value}'")]
    InvalidUrl { value: String },
    #[error("path target '{path}' has no base url on the request or the client")]
    MissingBaseUrl { path: String },
    #[error("operation name cannot be empty")]
    EmptyOperation,
    #[error("invalid header name '{name}'")]
    InvalidHeaderName { name: String },
    #[error("header '{name}' has a value containing control characters")]
    InvalidHeaderValue { name: String },
    #[error("invalid http method '{value}', expected one of GET, HEAD, OPTIONS, POST, PUT, PATCH, DELETE")]
    InvalidMethod { value: String },
    #[error("invalid cache mode '{value}', expected one of default, bypass, refresh")]
    InvalidCacheMode { value: String },
    #[error("cache key cannot be empty")]
    EmptyCacheKey,
    #[error("engine requires a transport")]
    MissingTransport,

    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure reported by a pluggable collaborator (cache, rate limiter, metrics).
///
/// Collaborators fail open unless the error is marked `fail_closed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    message: String,
    fail_closed: bool,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fail_closed: false,
        }
    }

    pub fn fail_closed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fail_closed: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_fail_closed(&self) -> bool {
        self.fail_closed
    }
}

/// Raised by a before-send interceptor to deny the whole logical request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InterceptorError {
    message: String,
}

impl InterceptorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Terminal error class of a logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    /// The request or client configuration was rejected before any attempt.
    Configuration,
    /// The last attempt was classified as a failure and no retry was allowed.
    Classified,
    /// The overall budget ran out before or between attempts.
    DeadlineExceeded,
    /// A before-send interceptor denied the request.
    Interceptor,
    /// The circuit breaker refused admission for the operation key.
    CircuitOpen,
    /// A fail-closed collaborator refused to serve the request.
    Collaborator,
    /// The engine was shut down.
    Shutdown,
}

/// Structured terminal error returned by [`crate::RequestEngine::execute`].
#[derive(Debug)]
pub struct RequestError {
    inner: Box<RequestErrorInner>,
}

#[derive(Debug)]
struct RequestErrorInner {
    kind: RequestErrorKind,
    category: ErrorCategory,
    status: Option<u16>,
    message: String,
    operation: String,
    correlation: Option<Correlation>,
    attempts: u32,
    outcome: Option<RequestOutcome>,
    source: Option<ConfigError>,
}

impl RequestError {
    pub(crate) fn new(
        kind: RequestErrorKind,
        category: ErrorCategory,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            inner: Box::new(RequestErrorInner {
                kind,
                category,
                status: None,
                message: message.into(),
                operation: operation.into(),
                correlation: None,
                attempts: 0,
                outcome: None,
                source: None,
            }),
        }
    }

    pub(crate) fn configuration(operation: impl Into<String>, error: ConfigError) -> Self {
        let mut request_error = Self::new(
            RequestErrorKind::Configuration,
            ErrorCategory::Validation,
            operation,
            error.to_string(),
        );
        request_error.inner.source = Some(error);
        request_error
    }

    pub(crate) fn shutdown(operation: impl Into<String>) -> Self {
        Self::new(
            RequestErrorKind::Shutdown,
            ErrorCategory::Canceled,
            operation,
            "engine has been shut down",
        )
    }

    pub(crate) fn with_status(mut self, status: Option<u16>) -> Self {
        self.inner.status = status;
        self
    }

    pub(crate) fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.inner.correlation = Some(correlation);
        self
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.inner.attempts = attempts;
        self
    }

    pub(crate) fn with_outcome(mut self, outcome: RequestOutcome) -> Self {
        self.inner.outcome = Some(outcome);
        self
    }

    pub fn kind(&self) -> RequestErrorKind {
        self.inner.kind
    }

    pub fn category(&self) -> ErrorCategory {
        self.inner.category
    }

    pub fn status(&self) -> Option<u16> {
        self.inner.status
    }

    pub fn message(&self) -> &str {
        &self.inner.message
    }

    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    pub fn correlation(&self) -> Option<&Correlation> {
        self.inner.correlation.as_ref()
    }

    /// Network attempts made before the request terminated.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts
    }

    /// Final outcome; absent only for configuration and shutdown errors.
    pub fn outcome(&self) -> Option<&RequestOutcome> {
        self.inner.outcome.as_ref()
    }

    pub fn config_error(&self) -> Option<&ConfigError> {
        self.inner.source.as_ref()
    }

    pub fn code(&self) -> &'static str {
        match self.inner.kind {
            RequestErrorKind::Configuration => "request.configuration",
            RequestErrorKind::Classified => self.inner.category.code(),
            RequestErrorKind::DeadlineExceeded => "request.deadline_exceeded",
            RequestErrorKind::Interceptor => "request.interceptor_denied",
            RequestErrorKind::CircuitOpen => "request.circuit_open",
            RequestErrorKind::Collaborator => "request.collaborator_failed",
            RequestErrorKind::Shutdown => "request.shutdown",
        }
    }
}

impl Display for RequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({}", self.inner.operation, self.inner.message, self.code())?;
        if let Some(status) = self.inner.status {
            write!(f, ", status {status}")?;
        }
        if self.inner.attempts > 0 {
            write!(f, ", attempts {}", self.inner.attempts)?;
        }
        if let Some(correlation) = &self.inner.correlation {
            write!(f, ", request_id {}", correlation.request_id)?;
        }
        f.write_str(")")
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|error| error as &(dyn std::error::Error + 'static))
    }
}
