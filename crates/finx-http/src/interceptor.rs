//! Ordered per-attempt hooks around the transport call.
//!
//! `before_send` hooks run in registration order on the attempt's own copy of the
//! prepared request. `after_response` and `on_error` run in reverse order and only observe.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::classify::ClassifiedError;
use crate::error::InterceptorError;
use crate::outcome::AttemptContext;
use crate::prepare::PreparedRequest;
use crate::request::Body;
use crate::transport::TransportResponse;

pub trait Interceptor: Send + Sync {
    /// Label used in logs and denial errors.
    fn name(&self) -> &str;

    /// May rewrite headers, body or resilience for this attempt. An error denies the
    /// whole logical request.
    fn before_send(
        &self,
        request: &mut PreparedRequest,
        context: &AttemptContext,
    ) -> Result<(), InterceptorError> {
        let _ = (request, context);
        Ok(())
    }

    fn after_response(
        &self,
        request: &PreparedRequest,
        response: &TransportResponse,
        context: &AttemptContext,
    ) {
        let _ = (request, response, context);
    }

    fn on_error(&self, request: &PreparedRequest, error: &ClassifiedError, context: &AttemptContext) {
        let _ = (request, error, context);
    }
}

/// Registration-ordered interceptor list.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs every `before_send` hook in order, stopping at the first denial.
    /// The error carries the denying interceptor's name.
    pub fn before_send(
        &self,
        request: &mut PreparedRequest,
        context: &AttemptContext,
    ) -> Result<(), (String, InterceptorError)> {
        for interceptor in &self.interceptors {
            interceptor
                .before_send(request, context)
                .map_err(|error| (interceptor.name().to_owned(), error))?;
        }
        Ok(())
    }

    pub fn after_response(
        &self,
        request: &PreparedRequest,
        response: &TransportResponse,
        context: &AttemptContext,
    ) {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.after_response(request, response, context);
        }
    }

    pub fn on_error(&self, request: &PreparedRequest, error: &ClassifiedError, context: &AttemptContext) {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.on_error(request, error, context);
        }
    }
}

/// Serializes `Body::Json` payloads to bytes and sets `content-type: application/json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody;

impl Interceptor for JsonBody {
    fn name(&self) -> &str {
        "json_body"
    }

    fn before_send(
        &self,
        request: &mut PreparedRequest,
        _context: &AttemptContext,
    ) -> Result<(), InterceptorError> {
        let Some(body @ Body::Json(_)) = &request.body else {
            return Ok(());
        };

        let bytes = body
            .to_bytes()
            .map_err(|error| InterceptorError::new(format!("failed to encode json body: {error}")))?;
        request.body = Some(Body::Bytes(bytes));
        request
            .headers
            .entry(String::from("content-type"))
            .or_insert_with(|| String::from("application/json"));
        Ok(())
    }
}

/// Writes a fixed header set onto every attempt, replacing existing values.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: BTreeMap<String, String>,
}

impl StaticHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }
}

impl Interceptor for StaticHeaders {
    fn name(&self) -> &str {
        "static_headers"
    }

    fn before_send(
        &self,
        request: &mut PreparedRequest,
        _context: &AttemptContext,
    ) -> Result<(), InterceptorError> {
        for (name, value) in &self.headers {
            request.headers.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

/// Upstream credentials attached before each attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    BearerToken(String),
    Header { name: String, value: String },
    Cookie(String),
}

impl HttpAuth {
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
            Self::Cookie(cookie) => {
                headers.insert(String::from("cookie"), cookie.clone());
            }
        }
    }
}

impl Interceptor for HttpAuth {
    fn name(&self) -> &str {
        "http_auth"
    }

    fn before_send(
        &self,
        request: &mut PreparedRequest,
        _context: &AttemptContext,
    ) -> Result<(), InterceptorError> {
        self.apply(&mut request.headers);
        Ok(())
    }
}
