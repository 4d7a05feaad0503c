//! Outcome catalog for the replay relay.
//!
//! Every way a claimed interception can end, other than a plain successful
//! replay, is listed here with the numeric code and message that end up on
//! the interception's output record. The codes are part of the coordinator
//! contract and must not be renumbered.
//!
//! # Code Ranges
//!
//! | Range     | Category    | Description                               |
//! |-----------|-------------|-------------------------------------------|
//! | 8000-8999 | Assembly    | Response could not be assembled           |
//! | 9000-9099 | Translate   | Captured request cannot be replayed       |
//! | 9100-9199 | Transport   | Local target could not be reached         |
//! | 9200-9299 | Claim       | Claim/acknowledge protocol                |
//! | 9300-9399 | Reporting   | Result could not be delivered             |
//! | 9900-9999 | Internal    | Unexpected failures                       |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal failure outcomes of the replay pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum OutcomeCode {
    /// Captured verb is outside the replay allow-list
    MethodNotAllowed,
    /// Local target refused the connection
    ConnectionRefused,
    /// Local target did not answer within the replay timeout
    ReplayTimeout,
    /// Any other transport-level failure
    TransportError,
    /// Response stream broke while being buffered
    AssemblyError,
    /// Another agent claimed the interception first
    ClaimConflict,
    /// Reply or reject could not be delivered to the coordinator
    ReportingFailure,
    /// Anything not anticipated above
    UnhandledException,
}

/// Category of an outcome, derived from its code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    Assembly,
    Translate,
    Transport,
    Claim,
    Reporting,
    Internal,
}

/// Catalog entry for an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeEntry {
    /// Numeric code stored in `output.code`.
    pub code: i32,
    /// Human message stored in `output.msg` unless a more specific one exists.
    pub message: &'static str,
    pub category: OutcomeCategory,
    /// Hints for the operator.
    pub remediation: &'static [&'static str],
}

impl OutcomeCode {
    /// All catalogued outcomes.
    pub const ALL: [OutcomeCode; 8] = [
        Self::MethodNotAllowed,
        Self::ConnectionRefused,
        Self::ReplayTimeout,
        Self::TransportError,
        Self::AssemblyError,
        Self::ClaimConflict,
        Self::ReportingFailure,
        Self::UnhandledException,
    ];

    pub fn entry(&self) -> OutcomeEntry {
        match self {
            Self::MethodNotAllowed => OutcomeEntry {
                code: 9000,
                message: "Method Not Allowed",
                category: OutcomeCategory::Translate,
                remediation: &["Only GET, POST, PUT, PATCH and DELETE requests are replayed"],
            },
            Self::ConnectionRefused => OutcomeEntry {
                code: 9100,
                message: "Connection Refused",
                category: OutcomeCategory::Transport,
                remediation: &[
                    "Start the local server",
                    "Check the forwarding host and port with `status`",
                ],
            },
            Self::ReplayTimeout => OutcomeEntry {
                code: 9198,
                message: "Replay Timeout",
                category: OutcomeCategory::Transport,
                remediation: &["Raise replay.timeout_ms or investigate the hung handler"],
            },
            Self::TransportError => OutcomeEntry {
                code: 9199,
                message: "Transport Error",
                category: OutcomeCategory::Transport,
                remediation: &["Check the forwarding provider (http/https) and TLS settings"],
            },
            Self::AssemblyError => OutcomeEntry {
                code: 8000,
                message: "Assembly Error",
                category: OutcomeCategory::Assembly,
                remediation: &["The local server closed the response stream early"],
            },
            Self::ClaimConflict => OutcomeEntry {
                code: 9200,
                message: "Claim Conflict",
                category: OutcomeCategory::Claim,
                remediation: &["Another agent is forwarding the same site"],
            },
            Self::ReportingFailure => OutcomeEntry {
                code: 9300,
                message: "Reporting Failure",
                category: OutcomeCategory::Reporting,
                remediation: &[
                    "Check connectivity to the coordinator",
                    "Sign in again if the session token expired",
                ],
            },
            Self::UnhandledException => OutcomeEntry {
                code: 9999,
                message: "Unhandled Exception",
                category: OutcomeCategory::Internal,
                remediation: &["Re-run with --verbose and report the log"],
            },
        }
    }

    /// Numeric code stored on the output record.
    pub fn code(&self) -> i32 {
        self.entry().code
    }

    /// Operator hints joined into one line.
    pub fn hint(&self) -> String {
        self.entry().remediation.join("; ")
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = self.entry();
        write!(f, "{} ({})", entry.message, entry.code)
    }
}
