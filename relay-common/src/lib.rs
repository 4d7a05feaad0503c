//! Shared types and utilities for the interception replay relay.
//!
//! The daemon (`relayd`) builds its engine on top of these: the wire data
//! model exchanged with the coordinator, the outcome catalog, layered
//! configuration and logging setup.

pub mod config;
pub mod errors;
pub mod logging;
pub mod types;
pub mod util;

pub use config::{ConfigError, PollingConfig, RelayConfig, ReplayConfig};
pub use errors::{OutcomeCategory, OutcomeCode, OutcomeEntry};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use types::{
    CapturedRequest, ForwardingTarget, Interception, InterceptionId, Provider, ReplayMethod,
    ReplayOutput,
};
pub use util::{mask_secret, render_preview};
