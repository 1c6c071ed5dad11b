use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::request::{Body, HttpMethod};

/// Boxed `Send` future returned by collaborator contracts.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fully formed request handed to a transport for exactly one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Body>,
    /// Time budget of this attempt. The engine enforces it regardless of the transport.
    pub timeout: Duration,
}

/// Raw status/headers/body triple returned by a transport.
///
/// Bodies are text: vendor payloads are JSON, CSV or pipe-delimited files. Transports
/// decode bytes as UTF-8 and replace invalid sequences with U+FFFD, so binary payloads
/// do not survive the round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport failure class, used by the default classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Aborted,
    Other,
}

/// Transport-level failure: no response was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Aborted,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Fires the abort signal handed to a transport.
#[derive(Debug)]
pub struct AbortController {
    sender: watch::Sender<bool>,
}

impl AbortController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn abort(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation signal for one attempt.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    receiver: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        AbortController::new().signal()
    }

    pub fn is_aborted(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the attempt is aborted; pends forever if it never is.
    pub async fn aborted(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sends one request over the wire. Implementations must honour the abort signal.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: TransportRequest,
        signal: AbortSignal,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>>;
}

/// Offline transport that answers every request with `200 {}`.
#[derive(Debug, Default)]
pub struct NoopTransport;

impl Transport for NoopTransport {
    fn send<'a>(
        &'a self,
        _request: TransportRequest,
        _signal: AbortSignal,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move { Ok(TransportResponse::ok_json("{}")) })
    }
}

/// Production transport backed by reqwest. Pooling, TLS and DNS stay inside reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Arc<reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("finx/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    async fn dispatch(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = &request.body {
            if matches!(body, Body::Json(_)) && !request.headers.contains_key("content-type") {
                builder = builder.header("content-type", "application/json");
            }
            let bytes = body
                .to_bytes()
                .map_err(|e| TransportError::new(format!("failed to encode request body: {e}")))?;
            builder = builder.body(bytes);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::timeout(format!("request timeout: {e}"))
            } else if e.is_connect() {
                TransportError::connect(format!("connection failed: {e}"))
            } else {
                TransportError::new(format!("request failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_owned()))
            })
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(format!("failed to read response body: {e}")))?;
        let body = decode_body(&bytes);

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// UTF-8 decode of a response body; invalid sequences become U+FFFD.
pub(crate) fn decode_body(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        request: TransportRequest,
        signal: AbortSignal,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            tokio::select! {
                result = self.dispatch(request) => result,
                _ = signal.aborted() => Err(TransportError::aborted("request aborted")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_decoding_keeps_utf8_and_replaces_invalid_bytes() {
        assert_eq!(decode_body("Société Générale".as_bytes()), "Société Générale");
        assert_eq!(decode_body(&[b'o', b'k', 0xFF]), "ok\u{FFFD}");
    }

    #[tokio::test]
    async fn abort_signal_resolves_after_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.aborted().await }
        });
        controller.abort();

        waiter.await.expect("waiter should finish");
        assert!(signal.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_does_not_fire() {
        let signal = AbortSignal::never();
        let fired = tokio::time::timeout(Duration::from_secs(5), signal.aborted()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn noop_transport_returns_empty_json() {
        let request = TransportRequest {
            method: HttpMethod::Get,
            url: String::from("https://example.test/quote"),
            headers: BTreeMap::new(),
            body: None,
            timeout: Duration::from_secs(1),
        };

        let response = NoopTransport
            .send(request, AbortSignal::never())
            .await
            .expect("noop transport never fails");
        assert!(response.is_success());
        assert_eq!(response.body, "{}");
    }

    #[test]
    fn response_headers_are_lowercased() {
        let response = TransportResponse::new(429, "").with_header("Retry-After", "2");
        assert_eq!(response.headers.get("retry-after").map(String::as_str), Some("2"));
    }
}
