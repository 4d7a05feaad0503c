//! Result reporting: reply with the response body, or reject.

use crate::coordinator::{Coordinator, CoordinatorError, StatusUpdate};
use crate::replay::ReplayOutcome;
use relay_common::{Interception, render_preview};
use std::sync::Arc;
use tracing::warn;

pub struct Reporter<C> {
    coordinator: Arc<C>,
}

impl<C> Clone for Reporter<C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<C: Coordinator> Reporter<C> {
    pub fn new(coordinator: Arc<C>) -> Self {
        Self { coordinator }
    }

    /// Report the terminal outcome of `interception` exactly once.
    ///
    /// A failed body upload is logged and the reply is still submitted. A
    /// reject whose output is still pending gets the outcome's code first.
    /// A failed submit is returned to the caller; nothing is retried.
    pub async fn report(
        &self,
        interception: &mut Interception,
        outcome: &ReplayOutcome,
    ) -> Result<(), CoordinatorError> {
        match outcome {
            ReplayOutcome::Success { body } => {
                interception.output.size = Some(body.len() as u64);
                interception.output.preview = if body.is_empty() {
                    None
                } else {
                    Some(render_preview(body))
                };

                if let Err(err) = self.coordinator.upload_body(&interception.id, body).await {
                    warn!(id = %interception.id, "body upload failed: {}", err);
                }
                let update = StatusUpdate::reply(interception.output.clone());
                self.coordinator.submit(&interception.id, &update).await
            }
            ReplayOutcome::Failure(outcome) => {
                if interception.output.is_pending() {
                    interception.output.fail(*outcome);
                }
                let update = StatusUpdate::reject(interception.output.clone());
                self.coordinator.submit(&interception.id, &update).await
            }
        }
    }
}
