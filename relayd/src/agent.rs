//! The polling agent.
//!
//! One control task polls, claims and dispatches; every claimed item is
//! replayed and reported on its own task. The next cycle is scheduled right
//! after dispatch, so replays never hold up polling.

use crate::claim::claim_cycle;
use crate::coordinator::Coordinator;
use crate::events::{CompletionEvent, EventKind};
use crate::replay::{ReplayExecutor, panic_message};
use crate::reporter::Reporter;
use crate::scheduler::{Notice, Scheduler, SchedulerPhase, Transition};
use crate::session::Session;
use crate::transport::Transport;
use futures::FutureExt;
use relay_common::{ForwardingTarget, Interception, InterceptionId, OutcomeCode, PollingConfig};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct Agent<C, T> {
    session: Arc<Session>,
    coordinator: Arc<C>,
    executor: ReplayExecutor<T>,
    reporter: Reporter<C>,
    scheduler: Scheduler,
}

impl<C: Coordinator, T: Transport> Agent<C, T> {
    pub fn new(
        session: Arc<Session>,
        coordinator: Arc<C>,
        transport: Arc<T>,
        polling: PollingConfig,
        replay_timeout: Duration,
    ) -> Self {
        Self {
            session,
            reporter: Reporter::new(coordinator.clone()),
            coordinator,
            executor: ReplayExecutor::new(transport, replay_timeout),
            scheduler: Scheduler::new(polling),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Agent started (polling {})",
            describe_site(&self.session.target())
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Agent stopping");
    }

    /// One scheduler step; returns the delay before the next one.
    pub async fn tick(&mut self) -> Duration {
        if self.session.is_paused() {
            if self.scheduler.phase() != SchedulerPhase::Paused {
                self.scheduler.on_pause();
                info!("Polling paused");
            }
            return self.scheduler.paused_delay();
        }
        if self.scheduler.phase() == SchedulerPhase::Paused {
            info!("Polling resumed");
            return self.scheduler.on_resume().delay;
        }
        self.run_cycle().await.delay
    }

    /// Poll, claim and dispatch once, then advance the scheduler.
    pub async fn run_cycle(&mut self) -> Transition {
        let target = self.session.target();
        match claim_cycle(self.coordinator.as_ref(), &target.site).await {
            Ok(cycle) => {
                let claimed = cycle.claimed.len();
                if cycle.polled > 0 {
                    debug!(
                        polled = cycle.polled,
                        claimed,
                        dropped = cycle.dropped(),
                        "poll cycle"
                    );
                }
                for interception in cycle.claimed {
                    self.dispatch(interception, target.clone());
                }
                let transition = self.scheduler.on_poll_success(claimed);
                self.announce(transition, None);
                transition
            }
            Err(err) => {
                debug!("poll failed: {}", err);
                let transition = self.scheduler.on_poll_failure();
                self.announce(transition, Some(&err.to_string()));
                transition
            }
        }
    }

    fn announce(&self, transition: Transition, reason: Option<&str>) {
        match transition.notice {
            Some(Notice::ConnectionLost) => {
                warn!(
                    "Coordinator connection lost ({}), retrying in {:?}",
                    reason.unwrap_or("unknown error"),
                    transition.delay
                );
                self.session.events().emit(
                    EventKind::Fault,
                    &json!({ "reason": reason, "retry_ms": transition.delay.as_millis() as u64 }),
                );
            }
            Some(Notice::ConnectionRestored) => {
                info!("Coordinator connection restored");
                self.session.events().signal(EventKind::Recovered);
            }
            None => {}
        }
    }

    /// Account for `interception` and hand it to its own task.
    fn dispatch(&self, interception: Interception, target: ForwardingTarget) {
        let guard = InFlight::start(self.session.clone(), interception.id.clone());
        let executor = self.executor.clone();
        let reporter = self.reporter.clone();
        tokio::spawn(process(guard, interception, target, executor, reporter));
    }
}

/// Replay then report one claimed item. Reports exactly once, whatever
/// happens along the way.
async fn process<C: Coordinator, T: Transport>(
    guard: InFlight,
    mut interception: Interception,
    target: ForwardingTarget,
    executor: ReplayExecutor<T>,
    reporter: Reporter<C>,
) {
    let outcome = executor.replay(&mut interception, &target).await;
    let reported = AssertUnwindSafe(reporter.report(&mut interception, &outcome))
        .catch_unwind()
        .await;
    match reported {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(
            id = %interception.id,
            "{}: {}",
            OutcomeCode::ReportingFailure,
            err
        ),
        Err(panic) => error!(
            id = %interception.id,
            "{} while reporting: {}",
            OutcomeCode::UnhandledException,
            panic_message(panic.as_ref())
        ),
    }
    guard.finish(outcome.is_success(), &interception);
}

/// Completes the accounting for one dispatched item exactly once, also when
/// its task is dropped before finishing.
struct InFlight {
    session: Arc<Session>,
    id: InterceptionId,
    done: bool,
}

impl InFlight {
    fn start(session: Arc<Session>, id: InterceptionId) -> Self {
        session.accounting().dispatch(&id);
        session.events().emit(
            EventKind::Dispatch,
            &json!({ "id": &id, "counters": session.accounting().snapshot() }),
        );
        Self {
            session,
            id,
            done: false,
        }
    }

    fn finish(mut self, success: bool, interception: &Interception) {
        self.done = true;
        let elapsed = self.session.accounting().complete(&self.id, success);
        debug!(
            id = %self.id,
            success,
            elapsed_ms = elapsed.map(|d| d.as_millis() as u64),
            "interception complete"
        );
        self.session.events().emit(
            EventKind::Complete,
            &CompletionEvent {
                id: &self.id,
                replied: success,
                status: interception.output.status,
                code: interception.output.code,
                elapsed_ms: elapsed.map(|d| d.as_millis() as u64),
                counters: self.session.accounting().snapshot(),
            },
        );
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.done {
            warn!(id = %self.id, "interception abandoned before completion");
            self.session.accounting().complete(&self.id, false);
        }
    }
}

/// Wait until no item is in flight. Returns false on timeout.
pub async fn drain(session: &Session, timeout: Duration) -> bool {
    let wait = async {
        while session.accounting().snapshot().queue_current > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(timeout, wait).await.is_ok()
}

fn describe_site(target: &ForwardingTarget) -> String {
    let site = if target.site.is_empty() {
        "all sites"
    } else {
        target.site.as_str()
    };
    format!("{} -> {}", site, target.origin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::MockCoordinator;
    use crate::transport::{MockBehavior, MockTransport, TransportError, TransportResponse};
    use relay_common::{CapturedRequest, ReplayOutput};

    fn item(id: &str, method: &str) -> Interception {
        Interception {
            id: InterceptionId::new(id),
            input: CapturedRequest {
                method: method.into(),
                url: "http://shop.example.com/path".into(),
                headers: Default::default(),
                body: None,
            },
            output: ReplayOutput::default(),
        }
    }

    fn agent(
        coordinator: &MockCoordinator,
        transport: &MockTransport,
    ) -> (Arc<Session>, Agent<MockCoordinator, MockTransport>) {
        let session = Arc::new(Session::new(ForwardingTarget {
            site: "shop.example.com".into(),
            ..Default::default()
        }));
        let agent = Agent::new(
            session.clone(),
            Arc::new(coordinator.clone()),
            Arc::new(transport.clone()),
            PollingConfig::default(),
            Duration::from_secs(5),
        );
        (session, agent)
    }

    #[tokio::test]
    async fn test_cycle_replays_and_reports_each_claimed_item() {
        let coordinator = MockCoordinator::new();
        let transport = MockTransport::new();
        coordinator.push_poll(vec![item("a", "GET"), item("b", "OPTIONS"), item("c", "POST")]);
        transport.respond(TransportResponse::new(200, "ok"));
        transport.fail(TransportError::ConnectionRefused);
        let (session, mut agent) = agent(&coordinator, &transport);

        let transition = agent.run_cycle().await;
        assert_eq!(transition.delay, Duration::from_millis(50));
        assert!(drain(&session, Duration::from_secs(5)).await);

        let counters = session.accounting().snapshot();
        assert_eq!(counters.replays + counters.errors, 3);
        assert_eq!(counters.errors, 2);
        assert_eq!(counters.queue_current, 0);
        assert_eq!(counters.queue_max, 3);

        let submits = coordinator.submits();
        assert_eq!(submits.len(), 3);
        let not_allowed = submits.iter().find(|(id, _)| id.as_str() == "b").unwrap();
        assert_eq!(not_allowed.1.status, "reject");
        assert_eq!(not_allowed.1.output.code, 9000);
        assert_eq!(transport.attempts().len(), 2);
        assert_eq!(coordinator.polled_sites(), vec!["shop.example.com"]);
    }

    #[tokio::test]
    async fn test_panicking_replay_is_reported_once() {
        let coordinator = MockCoordinator::new();
        let transport = MockTransport::new();
        coordinator.push_poll(vec![item("boom", "GET")]);
        transport.push(MockBehavior::Panic("mid-replay".into()));
        let (session, mut agent) = agent(&coordinator, &transport);

        agent.run_cycle().await;
        assert!(drain(&session, Duration::from_secs(5)).await);

        let submits = coordinator.submits();
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0].1.status, "reject");
        assert_eq!(submits[0].1.output.code, 9999);
        assert_eq!(session.accounting().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_fault_and_recovery_emit_events_once() {
        let coordinator = MockCoordinator::new();
        let transport = MockTransport::new();
        coordinator.push_poll_failure();
        coordinator.push_poll_failure();
        let (session, mut agent) = agent(&coordinator, &transport);
        let mut events = session.events().subscribe();

        assert_eq!(agent.run_cycle().await.delay, Duration::from_millis(5000));
        assert_eq!(agent.run_cycle().await.delay, Duration::from_millis(10000));
        let recovered = agent.run_cycle().await;
        assert_eq!(recovered.delay, Duration::from_millis(50));
        assert_eq!(recovered.notice, Some(Notice::ConnectionRestored));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            let parsed: serde_json::Value = serde_json::from_str(&event).unwrap();
            seen.push(parsed["event"].as_str().unwrap().to_string());
        }
        assert_eq!(seen, vec!["fault", "recovered"]);
    }

    #[tokio::test]
    async fn test_paused_agent_does_not_poll() {
        let coordinator = MockCoordinator::new();
        let transport = MockTransport::new();
        let (session, mut agent) = agent(&coordinator, &transport);

        session.pause();
        assert_eq!(agent.tick().await, Duration::from_millis(2500));
        assert_eq!(agent.scheduler().phase(), SchedulerPhase::Paused);
        assert!(coordinator.polled_sites().is_empty());

        session.resume();
        assert_eq!(agent.tick().await, Duration::from_millis(50));
        assert!(coordinator.polled_sites().is_empty());
        agent.tick().await;
        assert_eq!(coordinator.polled_sites().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_guard_completes_once() {
        let session = Arc::new(Session::new(ForwardingTarget::default()));
        let guard = InFlight::start(session.clone(), InterceptionId::new("x"));
        assert_eq!(session.accounting().snapshot().queue_current, 1);
        drop(guard);
        let counters = session.accounting().snapshot();
        assert_eq!(counters.queue_current, 0);
        assert_eq!(counters.errors, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let coordinator = MockCoordinator::new();
        let transport = MockTransport::new();
        let (_session, agent) = agent(&coordinator, &transport);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(agent.run(rx));
        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("agent should stop")
            .unwrap();
        assert!(!coordinator.polled_sites().is_empty());
    }
}
