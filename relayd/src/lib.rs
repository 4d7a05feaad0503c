//! Interception replay engine.
//!
//! The agent polls the coordinator for captured requests, claims them,
//! replays each one against the local forwarding target and reports the
//! response (reply) or the failure (reject). Each claimed item is attempted
//! exactly once.

pub mod accounting;
pub mod agent;
pub mod claim;
pub mod commands;
pub mod coordinator;
pub mod events;
pub mod replay;
pub mod reporter;
pub mod scheduler;
pub mod session;
pub mod translate;
pub mod transport;

pub use accounting::{CountersSnapshot, WorkAccounting};
pub use agent::{Agent, drain};
pub use claim::{PollCycle, claim_cycle};
pub use coordinator::{Coordinator, CoordinatorError, HttpCoordinator, MockCoordinator, StatusUpdate};
pub use events::{EventBus, EventKind};
pub use replay::{ReplayExecutor, ReplayOutcome};
pub use reporter::Reporter;
pub use scheduler::{Notice, Scheduler, SchedulerPhase, Transition};
pub use session::Session;
pub use translate::{ReplayRequest, TranslateError, translate};
pub use transport::{HttpTransport, MockTransport, Transport, TransportError, TransportResponse};
