//! One claim attempt: poll for new interceptions, then acknowledge each of
//! them concurrently.

use crate::coordinator::{Coordinator, CoordinatorError};
use futures::future::join_all;
use relay_common::Interception;
use tracing::debug;

/// Result of one poll-and-claim round. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PollCycle {
    /// Site filter used for the poll.
    pub site: String,
    /// Number of interceptions the poll returned.
    pub polled: usize,
    /// Interceptions granted to this agent.
    pub claimed: Vec<Interception>,
}

impl PollCycle {
    pub fn dropped(&self) -> usize {
        self.polled - self.claimed.len()
    }
}

/// Poll `coordinator` for `site` and claim what it returns.
///
/// Only a failing poll is an error. Items whose acknowledgement fails or is
/// refused are dropped from the batch and never retried.
pub async fn claim_cycle<C: Coordinator>(
    coordinator: &C,
    site: &str,
) -> Result<PollCycle, CoordinatorError> {
    let polled = coordinator.poll(site).await?;
    let count = polled.len();

    let acks = polled.iter().map(|item| coordinator.acknowledge(item));
    let results = join_all(acks).await;

    let mut claimed = Vec::with_capacity(count);
    for (item, result) in polled.iter().zip(results) {
        match result {
            Ok(Some(granted)) => claimed.push(granted),
            Ok(None) => debug!(id = %item.id, "claim not granted"),
            Err(err) => debug!(id = %item.id, "claim failed: {}", err),
        }
    }

    Ok(PollCycle {
        site: site.to_string(),
        polled: count,
        claimed,
    })
}
