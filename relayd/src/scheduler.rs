//! Polling cadence.
//!
//! A pure state machine: the agent feeds it poll outcomes and pause changes
//! and sleeps for the delay it returns. Fast polling while traffic flows,
//! linear idle backoff, and a separate, larger backoff while the coordinator
//! is unreachable.

use relay_common::PollingConfig;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    ActiveFast,
    ActiveBackoff,
    FaultedBackoff,
    Paused,
}

/// Operator-visible connectivity change. Emitted only on the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    ConnectionLost,
    ConnectionRestored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Delay before the next cycle.
    pub delay: Duration,
    pub notice: Option<Notice>,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    config: PollingConfig,
    phase: SchedulerPhase,
    interval_ms: u64,
    faulted: bool,
}

impl Scheduler {
    pub fn new(config: PollingConfig) -> Self {
        Self {
            interval_ms: config.interval_min_ms,
            config,
            phase: SchedulerPhase::ActiveFast,
            faulted: false,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// True between a connection-lost notice and the matching restore.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// The poll succeeded and `claimed` items were handed to replay.
    pub fn on_poll_success(&mut self, claimed: usize) -> Transition {
        let notice = if self.faulted {
            self.faulted = false;
            Some(Notice::ConnectionRestored)
        } else {
            None
        };

        if claimed > 0 || notice.is_some() || self.phase == SchedulerPhase::FaultedBackoff {
            self.phase = SchedulerPhase::ActiveFast;
            self.interval_ms = self.config.interval_min_ms;
        } else {
            self.phase = SchedulerPhase::ActiveBackoff;
            self.interval_ms = self
                .interval_ms
                .saturating_add(self.config.interval_step_ms)
                .min(self.config.interval_max_ms);
        }
        self.transition(notice)
    }

    /// The coordinator could not be reached.
    pub fn on_poll_failure(&mut self) -> Transition {
        if self.phase != SchedulerPhase::FaultedBackoff {
            self.interval_ms = 0;
        }
        self.phase = SchedulerPhase::FaultedBackoff;
        self.interval_ms = self
            .interval_ms
            .saturating_add(self.config.fault_step_ms)
            .min(self.config.fault_max_ms);

        let notice = if self.faulted {
            None
        } else {
            self.faulted = true;
            Some(Notice::ConnectionLost)
        };
        self.transition(notice)
    }

    pub fn on_pause(&mut self) {
        self.phase = SchedulerPhase::Paused;
    }

    /// Re-check interval while paused.
    pub fn paused_delay(&self) -> Duration {
        Duration::from_millis(self.config.paused_interval_ms)
    }

    /// Leave the paused state and poll again soon. An unresolved fault keeps
    /// its flag so the restore notice is still emitted exactly once.
    pub fn on_resume(&mut self) -> Transition {
        self.phase = SchedulerPhase::ActiveFast;
        self.interval_ms = self.config.interval_min_ms;
        self.transition(None)
    }

    fn transition(&self, notice: Option<Notice>) -> Transition {
        Transition {
            delay: self.interval(),
            notice,
        }
    }
}
