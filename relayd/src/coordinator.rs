//! Client for the coordination service.
//!
//! Every call carries `Authorization: Bearer <token>`. JSON responses use a
//! `{"data": ...}` envelope.

use relay_common::util::mask_secret;
use relay_common::{Interception, InterceptionId, ReplayOutput};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Coordinator request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Coordinator rejected the bearer token; sign in again")]
    Unauthorized,

    #[error("Coordinator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Coordinator response is missing '{0}'")]
    Envelope(&'static str),

    #[error("Coordinator unavailable: {0}")]
    Unavailable(String),
}

impl CoordinatorError {
    /// Another agent already owns the interception.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::CONFLICT.as_u16())
    }
}

/// Body of a status change posted to `/interception/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'static str>,
    pub status: &'static str,
    pub output: ReplayOutput,
}

impl StatusUpdate {
    /// Claim request.
    pub fn accept(output: ReplayOutput) -> Self {
        Self {
            result: None,
            status: "accept",
            output,
        }
    }

    pub fn reply(output: ReplayOutput) -> Self {
        Self {
            result: Some("replied"),
            status: "reply",
            output,
        }
    }

    pub fn reject(output: ReplayOutput) -> Self {
        Self {
            result: Some("rejected"),
            status: "reject",
            output,
        }
    }
}

/// Operations the agent needs from the coordination service.
pub trait Coordinator: Send + Sync + 'static {
    /// New interceptions for `site`. Empty when nothing is pending.
    fn poll(
        &self,
        site: &str,
    ) -> impl Future<Output = Result<Vec<Interception>, CoordinatorError>> + Send;

    /// Claim one interception. `None` means it was not granted to this agent.
    fn acknowledge(
        &self,
        interception: &Interception,
    ) -> impl Future<Output = Result<Option<Interception>, CoordinatorError>> + Send;

    /// Upload the raw response body as a multipart attachment.
    fn upload_body(
        &self,
        id: &InterceptionId,
        body: &[u8],
    ) -> impl Future<Output = Result<(), CoordinatorError>> + Send;

    /// Post a final status update.
    fn submit(
        &self,
        id: &InterceptionId,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<(), CoordinatorError>> + Send;
}

/// Multipart payload carrying one `file` part named `<id>.bin`; the boundary
/// is the interception id.
pub fn multipart_body(id: &InterceptionId, body: &[u8]) -> Vec<u8> {
    let boundary = id.as_str();
    let mut payload = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{boundary}.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    payload.extend_from_slice(body);
    payload.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    payload
}

pub fn multipart_content_type(id: &InterceptionId) -> String {
    format!("multipart/form-data; boundary={id}")
}

/// reqwest-backed coordinator client.
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpCoordinator {
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CoordinatorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let token = token.into();
        debug!(
            "Coordinator {} with token {}",
            base_url,
            mask_secret(&token)
        );
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Verify the service answers `{"status":"ok"}` on its base URL.
    pub async fn check(&self) -> Result<(), CoordinatorError> {
        let response = self.client.get(&self.base_url).send().await?;
        if !response.status().is_success() {
            return Err(CoordinatorError::Unavailable(format!(
                "{} answered {}",
                self.base_url,
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        match body.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(()),
            _ => Err(CoordinatorError::Unavailable(format!(
                "{} did not report status ok",
                self.base_url
            ))),
        }
    }

    fn interception_url(&self, id: &InterceptionId) -> String {
        format!(
            "{}/interception/{}",
            self.base_url,
            urlencoding::encode(id.as_str())
        )
    }

    /// POST JSON and return the `data` member of the response envelope.
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<Value, CoordinatorError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let mut envelope: Value = response.json().await?;
        match envelope.get_mut("data") {
            Some(data) if !data.is_null() => Ok(data.take()),
            _ => Err(CoordinatorError::Envelope("data")),
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CoordinatorError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(CoordinatorError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CoordinatorError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }
    Ok(response)
}

impl Coordinator for HttpCoordinator {
    async fn poll(&self, site: &str) -> Result<Vec<Interception>, CoordinatorError> {
        let request = json!({
            "interception": { "status": "new", "webapp": site }
        });
        let url = format!("{}/poll", self.base_url);
        let mut data = self.post_json(&url, &request).await?;
        let items = match data.get_mut("interceptions").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        Ok(items.into_iter().filter_map(parse_interception).collect())
    }

    async fn acknowledge(
        &self,
        interception: &Interception,
    ) -> Result<Option<Interception>, CoordinatorError> {
        let update = StatusUpdate::accept(interception.output.clone());
        let url = self.interception_url(&interception.id);
        let mut data = match self.post_json(&url, &update).await {
            Ok(data) => data,
            Err(err) if err.is_conflict() => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(data
            .get_mut("interception")
            .map(Value::take)
            .and_then(parse_interception))
    }

    async fn upload_body(&self, id: &InterceptionId, body: &[u8]) -> Result<(), CoordinatorError> {
        let url = format!("{}/body", self.interception_url(id));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, multipart_content_type(id))
            .body(multipart_body(id, body))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn submit(&self, id: &InterceptionId, update: &StatusUpdate) -> Result<(), CoordinatorError> {
        let url = self.interception_url(id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(update)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

fn parse_interception(value: Value) -> Option<Interception> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<Interception>(value) {
        Ok(interception) => Some(interception),
        Err(err) => {
            warn!("Skipping malformed interception from coordinator: {}", err);
            None
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    polls: VecDeque<Option<Vec<Interception>>>,
    conflicts: HashSet<InterceptionId>,
    failing_acks: HashSet<InterceptionId>,
    fail_uploads: bool,
    fail_submits: bool,
    polled_sites: Vec<String>,
    acks: Vec<InterceptionId>,
    uploads: Vec<(InterceptionId, Vec<u8>)>,
    submits: Vec<(InterceptionId, StatusUpdate)>,
}

/// Deterministic in-memory coordinator for tests.
///
/// Polls are consumed FIFO; an exhausted script polls empty.
#[derive(Debug, Clone, Default)]
pub struct MockCoordinator {
    state: Arc<Mutex<MockState>>,
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_poll(&self, items: Vec<Interception>) {
        self.state().polls.push_back(Some(items));
    }

    /// Script a poll that fails as if the coordinator were unreachable.
    pub fn push_poll_failure(&self) {
        self.state().polls.push_back(None);
    }

    /// Make the acknowledgement of `id` return "not granted".
    pub fn conflict(&self, id: &InterceptionId) {
        self.state().conflicts.insert(id.clone());
    }

    /// Make the acknowledgement of `id` fail.
    pub fn fail_ack(&self, id: &InterceptionId) {
        self.state().failing_acks.insert(id.clone());
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.state().fail_uploads = fail;
    }

    pub fn fail_submits(&self, fail: bool) {
        self.state().fail_submits = fail;
    }

    #[must_use]
    pub fn polled_sites(&self) -> Vec<String> {
        self.state().polled_sites.clone()
    }

    #[must_use]
    pub fn acks(&self) -> Vec<InterceptionId> {
        self.state().acks.clone()
    }

    #[must_use]
    pub fn uploads(&self) -> Vec<(InterceptionId, Vec<u8>)> {
        self.state().uploads.clone()
    }

    #[must_use]
    pub fn submits(&self) -> Vec<(InterceptionId, StatusUpdate)> {
        self.state().submits.clone()
    }
}

impl Coordinator for MockCoordinator {
    async fn poll(&self, site: &str) -> Result<Vec<Interception>, CoordinatorError> {
        let mut state = self.state();
        state.polled_sites.push(site.to_string());
        match state.polls.pop_front() {
            Some(Some(items)) => Ok(items),
            Some(None) => Err(CoordinatorError::Unavailable("scripted poll failure".into())),
            None => Ok(Vec::new()),
        }
    }

    async fn acknowledge(
        &self,
        interception: &Interception,
    ) -> Result<Option<Interception>, CoordinatorError> {
        let mut state = self.state();
        state.acks.push(interception.id.clone());
        if state.failing_acks.contains(&interception.id) {
            return Err(CoordinatorError::Unavailable("scripted ack failure".into()));
        }
        if state.conflicts.contains(&interception.id) {
            return Ok(None);
        }
        Ok(Some(interception.clone()))
    }

    async fn upload_body(&self, id: &InterceptionId, body: &[u8]) -> Result<(), CoordinatorError> {
        let mut state = self.state();
        state.uploads.push((id.clone(), body.to_vec()));
        if state.fail_uploads {
            return Err(CoordinatorError::Unavailable("scripted upload failure".into()));
        }
        Ok(())
    }

    async fn submit(&self, id: &InterceptionId, update: &StatusUpdate) -> Result<(), CoordinatorError> {
        let mut state = self.state();
        state.submits.push((id.clone(), update.clone()));
        if state.fail_submits {
            return Err(CoordinatorError::Unauthorized);
        }
        Ok(())
    }
}
