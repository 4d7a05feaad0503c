//! Session context shared by the agent loop, replay tasks and the control
//! surface.

use crate::accounting::WorkAccounting;
use crate::events::{EventBus, EventKind};
use relay_common::ForwardingTarget;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub struct Session {
    target: RwLock<ForwardingTarget>,
    paused: AtomicBool,
    accounting: WorkAccounting,
    events: EventBus,
}

impl Session {
    pub fn new(target: ForwardingTarget) -> Self {
        Self {
            target: RwLock::new(target),
            paused: AtomicBool::new(false),
            accounting: WorkAccounting::new(),
            events: EventBus::default(),
        }
    }

    /// Snapshot of the forwarding target for one replay.
    pub fn target(&self) -> ForwardingTarget {
        self.target
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply a change to the forwarding target. Items already dispatched keep
    /// the snapshot they started with.
    pub fn update_target(&self, change: impl FnOnce(&mut ForwardingTarget)) -> ForwardingTarget {
        let updated = {
            let mut target = self
                .target
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            change(&mut target);
            target.clone()
        };
        info!(
            "Forwarding {} to {}",
            if updated.site.is_empty() { "*" } else { updated.site.as_str() },
            updated.origin()
        );
        self.events.emit(EventKind::TargetChanged, &updated);
        updated
    }

    /// Returns false if the session was already paused.
    pub fn pause(&self) -> bool {
        let changed = !self.paused.swap(true, Ordering::SeqCst);
        if changed {
            self.events.signal(EventKind::Paused);
        }
        changed
    }

    /// Returns false if the session was not paused.
    pub fn resume(&self) -> bool {
        let changed = self.paused.swap(false, Ordering::SeqCst);
        if changed {
            self.events.signal(EventKind::Resumed);
        }
        changed
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn accounting(&self) -> &WorkAccounting {
        &self.accounting
    }

    pub fn reset_counters(&self) {
        self.accounting.reset();
        self.events.emit(EventKind::CountersReset, &self.accounting.snapshot());
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
