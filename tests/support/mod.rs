//! Shared fixtures for the behaviour tests: a scripted transport that records every
//! attempt and a few failing collaborators.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use finx_http::{
    AbortSignal, BoxFuture, Cache, CacheEntry, CollaboratorError, MetricsSink, RateLimiter,
    RequestInfo, ThrottleContext, Transport, TransportError, TransportRequest, TransportResponse,
};
use tokio::time::Instant;

/// What the transport does for one attempt.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(TransportResponse),
    Fail(TransportError),
    /// Never answers; resolves only when the attempt is aborted.
    Hang,
}

pub fn status(code: u16) -> Step {
    Step::Respond(TransportResponse::new(code, "{}"))
}

pub fn ok(body: &str) -> Step {
    Step::Respond(TransportResponse::ok_json(body))
}

/// Plays back `steps` in order, then answers `200 {}` forever.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<TransportRequest>>,
    sent_at: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            sent_at: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.sent_at.lock().expect("sent_at lock").clone()
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        request: TransportRequest,
        signal: AbortSignal,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        self.requests.lock().expect("requests lock").push(request);
        self.sent_at.lock().expect("sent_at lock").push(Instant::now());
        let step = self
            .steps
            .lock()
            .expect("steps lock")
            .pop_front()
            .unwrap_or_else(|| ok("{}"));

        Box::pin(async move {
            match step {
                Step::Respond(response) => Ok(response),
                Step::Fail(error) => Err(error),
                Step::Hang => {
                    signal.aborted().await;
                    Err(TransportError::aborted("aborted by engine"))
                }
            }
        })
    }
}

/// Cache whose every operation fails with the given error.
#[derive(Debug)]
pub struct BrokenCache {
    pub error: CollaboratorError,
}

impl Cache for BrokenCache {
    fn get<'a>(
        &'a self,
        _key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, CollaboratorError>> {
        let error = self.error.clone();
        Box::pin(async move { Err(error) })
    }

    fn set<'a>(
        &'a self,
        _key: &'a str,
        _entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        let error = self.error.clone();
        Box::pin(async move { Err(error) })
    }
}

/// Rate limiter whose `throttle` always fails with the given error.
#[derive(Debug)]
pub struct BrokenLimiter {
    pub error: CollaboratorError,
}

impl RateLimiter for BrokenLimiter {
    fn throttle<'a>(
        &'a self,
        _key: &'a str,
        _context: &'a ThrottleContext,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        let error = self.error.clone();
        Box::pin(async move { Err(error) })
    }
}

/// Metrics sink that rejects every record.
#[derive(Debug, Default)]
pub struct BrokenMetrics;

impl MetricsSink for BrokenMetrics {
    fn record_request(&self, _info: &RequestInfo) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::new("statsd unreachable"))
    }
}
