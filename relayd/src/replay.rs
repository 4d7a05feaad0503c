//! Replay executor: translate, send, and record the result on the output.

use crate::transport::{Transport, TransportError};
use crate::translate::{TranslateError, translate};
use futures::FutureExt;
use indexmap::IndexMap;
use relay_common::{ForwardingTarget, Interception, OutcomeCode, ReplayOutput};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Terminal result of one replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The target answered; any status counts. Carries the raw body.
    Success { body: Vec<u8> },
    /// The replay failed; the code is also stored on the output record.
    Failure(OutcomeCode),
}

impl ReplayOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

pub struct ReplayExecutor<T> {
    transport: Arc<T>,
    timeout: Duration,
}

impl<T> Clone for ReplayExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T: Transport> ReplayExecutor<T> {
    pub fn new(transport: Arc<T>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Replay `interception` against `target`, filling in its output record.
    ///
    /// Never panics: a panic anywhere below is converted into
    /// [`OutcomeCode::UnhandledException`].
    pub async fn replay(
        &self,
        interception: &mut Interception,
        target: &ForwardingTarget,
    ) -> ReplayOutcome {
        interception.output = ReplayOutput::pending(target);
        let result = AssertUnwindSafe(self.execute(interception, target))
            .catch_unwind()
            .await;
        match result {
            Ok(outcome) => outcome,
            Err(panic) => {
                let outcome = OutcomeCode::UnhandledException;
                error!(
                    id = %interception.id,
                    category = ?outcome.entry().category,
                    hint = %outcome.hint(),
                    "unexpected error during replay: {}",
                    panic_message(panic.as_ref())
                );
                interception.output.fail(outcome);
                ReplayOutcome::Failure(outcome)
            }
        }
    }

    async fn execute(
        &self,
        interception: &mut Interception,
        target: &ForwardingTarget,
    ) -> ReplayOutcome {
        let request = match translate(interception, target) {
            Ok(request) => request,
            Err(err) => {
                match &err {
                    TranslateError::MethodNotAllowed { method } => warn!(
                        hint = %err.outcome().hint(),
                        "not supported: {} {}",
                        method.to_ascii_lowercase(),
                        target.origin()
                    ),
                    TranslateError::MalformedUrl { .. } => error!(
                        category = ?err.outcome().entry().category,
                        hint = %err.outcome().hint(),
                        "{}",
                        err
                    ),
                }
                interception.output.fail(err.outcome());
                return ReplayOutcome::Failure(err.outcome());
            }
        };

        info!("{}", request.display_line());
        debug!(id = %interception.id, headers = %request.redacted_headers(), "replay request");
        let sent = tokio::time::timeout(self.timeout, self.transport.send(&request)).await;
        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return self.fail(interception, &request.display_line(), err),
            Err(_) => {
                return self.fail(interception, &request.display_line(), TransportError::Timeout);
            }
        };

        debug!(
            id = %interception.id,
            status = response.status,
            bytes = response.body.len(),
            "target responded"
        );
        interception.output.status = i32::from(response.status);
        interception.output.headers = header_record(response.headers);
        ReplayOutcome::Success {
            body: response.body,
        }
    }

    fn fail(&self, interception: &mut Interception, line: &str, err: TransportError) -> ReplayOutcome {
        let outcome = err.outcome();
        error!(
            id = %interception.id,
            category = ?outcome.entry().category,
            hint = %outcome.hint(),
            "error: {} ({})",
            line,
            err
        );
        interception.output.fail_with(outcome, err.message());
        ReplayOutcome::Failure(outcome)
    }
}

/// Response headers as stored on the output record; repeated names become
/// arrays.
fn header_record(headers: Vec<(String, String)>) -> IndexMap<String, Value> {
    let mut record: IndexMap<String, Value> = IndexMap::with_capacity(headers.len());
    for (name, value) in headers {
        match record.get_mut(&name) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                record.insert(name, Value::String(value));
            }
        }
    }
    record
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
