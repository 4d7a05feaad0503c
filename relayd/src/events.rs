//! Relay event stream.
//!
//! State changes of the agent are published as JSON lines on a broadcast
//! channel. `relayd --events` copies them to stderr for tooling that wants to
//! follow the relay without scraping its logs. Emitting with no receivers is a
//! no-op.

use crate::accounting::CountersSnapshot;
use chrono::Utc;
use relay_common::InterceptionId;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An acknowledged item was handed to the executor.
    Dispatch,
    /// An item reached its terminal outcome.
    Complete,
    /// The coordinator became unreachable.
    Fault,
    /// The coordinator is reachable again.
    Recovered,
    Paused,
    Resumed,
    TargetChanged,
    CountersReset,
}

/// Payload of [`EventKind::Complete`].
#[derive(Debug, Serialize)]
pub struct CompletionEvent<'a> {
    pub id: &'a InterceptionId,
    pub replied: bool,
    pub status: i32,
    pub code: i32,
    pub elapsed_ms: Option<u64>,
    pub counters: CountersSnapshot,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    event: EventKind,
    data: &'a T,
    timestamp: String,
}

/// Broadcast channel of serialized relay events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    pub fn emit<T: Serialize>(&self, kind: EventKind, data: &T) {
        let envelope = Envelope {
            event: kind,
            data,
            timestamp: Utc::now().to_rfc3339(),
        };
        match serde_json::to_string(&envelope) {
            Ok(line) => {
                let _ = self.sender.send(line);
            }
            Err(err) => warn!("Failed to serialize {:?} event: {}", kind, err),
        }
    }

    /// Emit an event without a payload.
    pub fn signal(&self, kind: EventKind) {
        self.emit(kind, &json!({}));
    }
}

/// Write every event from `events` to `out`, one JSON document per line,
/// until the bus is dropped. A slow writer skips the events it missed.
pub async fn write_events<W>(
    mut events: broadcast::Receiver<String>,
    mut out: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match events.recv().await {
            Ok(line) => {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                out.flush().await?;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event output fell behind; {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("event bus closed");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_emit_wraps_payload_with_timestamp() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(EventKind::TargetChanged, &json!({ "port": 3000 }));

        let msg = tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("broadcast recv failed");

        let parsed: serde_json::Value = serde_json::from_str(&msg).expect("invalid json");
        assert_eq!(parsed["event"], "target_changed");
        assert_eq!(parsed["data"]["port"], 3000);
        let ts = parsed["timestamp"].as_str().expect("timestamp should be string");
        chrono::DateTime::parse_from_rfc3339(ts).expect("timestamp should be RFC3339");
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.signal(EventKind::Resumed);
    }

    #[tokio::test]
    async fn test_completion_event_shape() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let id = InterceptionId::new("abc");

        bus.emit(
            EventKind::Complete,
            &CompletionEvent {
                id: &id,
                replied: false,
                status: -1,
                code: 9100,
                elapsed_ms: Some(3),
                counters: CountersSnapshot::default(),
            },
        );

        let msg = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["event"], "complete");
        assert_eq!(parsed["data"]["id"], "abc");
        assert_eq!(parsed["data"]["code"], 9100);
        assert_eq!(parsed["data"]["counters"]["replays"], 0);
    }

    #[tokio::test]
    async fn test_write_events_emits_json_lines_until_closed() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.signal(EventKind::Paused);
        bus.signal(EventKind::Resumed);
        drop(bus);

        let mut out = Vec::new();
        write_events(rx, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let events: Vec<String> = text
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["event"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(events, vec!["paused", "resumed"]);
        assert!(text.ends_with('\n'));
    }
}
