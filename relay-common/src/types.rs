//! Common types used across relay components.

use crate::errors::OutcomeCode;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Label the agent stamps onto every output record it produces.
pub const OUTPUT_FACTORY: &str = "debugger";

/// Status and code value of an output record that has not been executed yet.
pub const PENDING: i32 = -1;

/// Opaque identifier assigned by the coordinator to an interception.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterceptionId(pub String);

impl InterceptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterceptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheme used to reach the forwarding target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Http,
    Https,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(format!("unknown provider '{other}' (expected http or https)")),
        }
    }
}

/// HTTP verbs the relay is willing to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl ReplayMethod {
    /// Match a captured method token against the allow-list, ignoring case.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether a captured body is sent along with this verb.
    pub fn carries_body(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for ReplayMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where captured requests are replayed.
///
/// Owned by the session. A replay works on a snapshot, so runtime changes
/// only affect items dispatched afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingTarget {
    /// Remote-facing hostname whose traffic is being debugged.
    #[serde(default)]
    pub site: String,
    /// Local host to replay against.
    #[serde(default = "default_host")]
    pub host: String,
    /// Local port to replay against.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Scheme used for the local connection.
    #[serde(default)]
    pub provider: Provider,
    /// Verify the target's TLS certificate (off for self-signed dev certs).
    #[serde(default)]
    pub verify_tls: bool,
}

impl Default for ForwardingTarget {
    fn default() -> Self {
        Self {
            site: String::new(),
            host: default_host(),
            port: default_port(),
            provider: Provider::Http,
            verify_tls: false,
        }
    }
}

impl ForwardingTarget {
    /// `scheme://host:port` of the local target.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.provider, self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Request descriptor captured from the original caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    /// Method token as captured (any case).
    pub method: String,
    /// Absolute URL including the query string.
    pub url: String,
    /// Captured headers in their original order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: IndexMap<String, Value>,
    /// Captured body. Only string bodies are replayed.
    #[serde(default)]
    pub body: Option<Value>,
}

impl CapturedRequest {
    /// Raw bytes of the captured body, if it was captured as a string.
    pub fn raw_body(&self) -> Option<&[u8]> {
        match &self.body {
            Some(Value::String(body)) => Some(body.as_bytes()),
            _ => None,
        }
    }
}

/// Result record the agent fills in while replaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayOutput {
    pub status: i32,
    pub headers: IndexMap<String, Value>,
    pub host: String,
    pub port: u16,
    pub provider: Provider,
    pub factory: String,
    pub msg: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl Default for ReplayOutput {
    fn default() -> Self {
        Self {
            status: PENDING,
            headers: IndexMap::new(),
            host: String::new(),
            port: 0,
            provider: Provider::Http,
            factory: String::new(),
            msg: String::new(),
            code: PENDING,
            size: None,
            preview: None,
        }
    }
}

impl ReplayOutput {
    /// Fresh pending record pointing at `target`.
    pub fn pending(target: &ForwardingTarget) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            provider: target.provider,
            factory: OUTPUT_FACTORY.to_string(),
            ..Self::default()
        }
    }

    /// True until either a response status or a failure code is recorded.
    pub fn is_pending(&self) -> bool {
        self.status == PENDING && self.code == PENDING
    }

    /// Record a failure outcome with the catalog message.
    pub fn fail(&mut self, outcome: OutcomeCode) {
        self.fail_with(outcome, outcome.entry().message);
    }

    /// Record a failure outcome with a custom message.
    pub fn fail_with(&mut self, outcome: OutcomeCode, msg: impl Into<String>) {
        self.code = outcome.code();
        self.msg = msg.into();
    }
}

/// A unit of replay work handed out by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interception {
    #[serde(rename = "interception")]
    pub id: InterceptionId,
    pub input: CapturedRequest,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: ReplayOutput,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
