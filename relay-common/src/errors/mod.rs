//! Outcome catalog and error definitions for the replay relay.
//!
//! Replay failures are never raised as faults; they are resolved into an
//! [`OutcomeCode`] whose code and message are written onto the
//! interception's output record and reported to the coordinator.

pub mod catalog;

pub use catalog::{OutcomeCategory, OutcomeCode, OutcomeEntry};
