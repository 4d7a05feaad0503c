//! Transport to the local target.
//!
//! [`HttpTransport`] sends translated requests with reqwest and buffers the
//! response body as raw bytes. [`MockTransport`] replays scripted behaviors
//! and records every attempt for deterministic tests.

use crate::translate::ReplayRequest;
use relay_common::OutcomeCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use std::collections::VecDeque;
use std::future::Future;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Response captured from the local target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Response headers in arrival order; repeated names appear repeatedly.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused")]
    ConnectionRefused,

    #[error("timed out waiting for the target")]
    Timeout,

    /// Any other connection-level failure, identified by an errno-style code.
    #[error("transport error {code}")]
    Io { code: String },

    /// The response started but could not be read to the end.
    #[error("response assembly failed: {0}")]
    Assembly(String),

    /// The request could not be built from the captured data.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl TransportError {
    pub fn outcome(&self) -> OutcomeCode {
        match self {
            Self::ConnectionRefused => OutcomeCode::ConnectionRefused,
            Self::Timeout => OutcomeCode::ReplayTimeout,
            Self::Io { .. } => OutcomeCode::TransportError,
            Self::Assembly(_) => OutcomeCode::AssemblyError,
            Self::Invalid(_) => OutcomeCode::UnhandledException,
        }
    }

    /// Message stored on the output record.
    pub fn message(&self) -> String {
        match self {
            Self::Io { code } => code.clone(),
            other => other.outcome().entry().message.to_string(),
        }
    }
}

/// Sends one replay request and collects the complete response.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: &ReplayRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// reqwest-backed transport.
///
/// Redirects are not followed and bodies are not decompressed: the target's
/// response is reported exactly as sent.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    verified: reqwest::Client,
    insecure: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            verified: Self::builder().build()?,
            insecure: Self::builder().danger_accept_invalid_certs(true).build()?,
        })
    }

    fn builder() -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .redirect(Policy::none())
            .no_proxy()
    }

    fn client(&self, verify_tls: bool) -> &reqwest::Client {
        if verify_tls { &self.verified } else { &self.insecure }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: &ReplayRequest) -> Result<TransportResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError::Invalid(e.to_string()))?;
        let headers = header_map(&request.headers)?;

        let mut builder = self
            .client(request.verify_tls)
            .request(method, request.url())
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let mut response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) if e.is_timeout() => return Err(TransportError::Timeout),
                Err(e) => return Err(TransportError::Assembly(innermost_message(&e))),
            }
        }

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::Invalid(format!("header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| TransportError::Invalid(format!("value of header '{name}'")))?;
        map.append(name, value);
    }
    Ok(map)
}

/// Map a send failure onto the transport taxonomy.
fn classify(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout;
    }
    if error.is_builder() {
        return TransportError::Invalid(innermost_message(error));
    }

    let mut source = Some(error as &(dyn std::error::Error + 'static));
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            if io.kind() == ErrorKind::ConnectionRefused {
                return TransportError::ConnectionRefused;
            }
            if let Some(code) = errno_name(io) {
                return TransportError::Io { code };
            }
        }
        source = current.source();
    }

    let message = innermost_message(error);
    if message.contains("dns error") || message.contains("failed to lookup") {
        return TransportError::Io {
            code: "ENOTFOUND".to_string(),
        };
    }
    TransportError::Io { code: message }
}

fn errno_name(error: &std::io::Error) -> Option<String> {
    let name = match error.kind() {
        ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => "ECONNRESET",
        ErrorKind::ConnectionAborted => "ECONNABORTED",
        ErrorKind::TimedOut => "ETIMEDOUT",
        ErrorKind::BrokenPipe => "EPIPE",
        ErrorKind::HostUnreachable => "EHOSTUNREACH",
        ErrorKind::NetworkUnreachable => "ENETUNREACH",
        ErrorKind::AddrInUse => "EADDRINUSE",
        ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        ErrorKind::NotConnected => "ENOTCONN",
        _ => return None,
    };
    Some(name.to_string())
}

fn innermost_message(error: &(dyn std::error::Error + 'static)) -> String {
    let mut current = error;
    while let Some(next) = current.source() {
        current = next;
    }
    current.to_string()
}

/// Scripted behavior of one [`MockTransport`] send.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Respond(TransportResponse),
    Fail(TransportError),
    /// Panic inside the send future.
    Panic(String),
    /// Never complete; only a timeout ends the attempt.
    Stall,
}

/// Deterministic in-memory transport for tests.
///
/// Behaviors are consumed FIFO; once the script is empty every send answers
/// `200` with an empty body.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<MockBehavior>>>,
    attempts: Arc<Mutex<Vec<ReplayRequest>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, behavior: MockBehavior) {
        lock(&self.script).push_back(behavior);
    }

    pub fn respond(&self, response: TransportResponse) {
        self.push(MockBehavior::Respond(response));
    }

    pub fn fail(&self, error: TransportError) {
        self.push(MockBehavior::Fail(error));
    }

    /// Snapshot of every request the mock was asked to send.
    #[must_use]
    pub fn attempts(&self) -> Vec<ReplayRequest> {
        lock(&self.attempts).clone()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: &ReplayRequest) -> Result<TransportResponse, TransportError> {
        lock(&self.attempts).push(request.clone());
        let behavior = lock(&self.script).pop_front();
        match behavior {
            None => Ok(TransportResponse::new(200, Vec::new())),
            Some(MockBehavior::Respond(response)) => Ok(response),
            Some(MockBehavior::Fail(error)) => Err(error),
            Some(MockBehavior::Panic(message)) => panic!("{message}"),
            Some(MockBehavior::Stall) => futures::future::pending().await,
        }
    }
}
