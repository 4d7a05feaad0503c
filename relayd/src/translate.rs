//! Translation of a captured request into a request against the local target.
//!
//! Host, port and scheme come from the forwarding target; the path, headers
//! and body come from the captured request. The captured URL is decoded once
//! and only spaces are re-escaped: `%20` in the path, `+` in the query.

use relay_common::util::is_sensitive_header;
use relay_common::{ForwardingTarget, Interception, OutcomeCode, Provider, ReplayMethod};
use serde_json::Value;
use std::fmt::Write;
use thiserror::Error;

/// Headers that describe the original connection rather than the request.
/// The client recomputes them for the replayed body.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "upgrade",
    "proxy-connection",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("Method '{method}' is not allowed for replay")]
    MethodNotAllowed { method: String },

    #[error("Captured URL '{url}' cannot be replayed: {reason}")]
    MalformedUrl { url: String, reason: String },
}

impl TranslateError {
    pub fn outcome(&self) -> OutcomeCode {
        match self {
            Self::MethodNotAllowed { .. } => OutcomeCode::MethodNotAllowed,
            Self::MalformedUrl { .. } => OutcomeCode::UnhandledException,
        }
    }
}

/// A request ready to be sent to the local target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRequest {
    pub method: ReplayMethod,
    pub scheme: Provider,
    pub host: String,
    pub port: u16,
    /// Path and query, starting with `/`.
    pub path: String,
    /// Captured headers in their original order.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub verify_tls: bool,
}

impl ReplayRequest {
    pub fn url(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{}://{}:{}{}", self.scheme, host, self.port, self.path)
    }

    /// Headers for logging, with credential values masked.
    pub fn redacted_headers(&self) -> String {
        self.headers
            .iter()
            .map(|(name, value)| {
                if is_sensitive_header(name) {
                    format!("{name}: ***")
                } else {
                    format!("{name}: {value}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `<verb> <scheme>://<host>:<port><path>` as printed at dispatch.
    pub fn display_line(&self) -> String {
        format!(
            "{} {}://{}:{}{}",
            self.method.as_str().to_ascii_lowercase(),
            self.scheme,
            self.host,
            self.port,
            self.path
        )
    }
}

/// Build the replay request for `interception` against `target`.
pub fn translate(
    interception: &Interception,
    target: &ForwardingTarget,
) -> Result<ReplayRequest, TranslateError> {
    let input = &interception.input;
    let method =
        ReplayMethod::parse(&input.method).ok_or_else(|| TranslateError::MethodNotAllowed {
            method: input.method.clone(),
        })?;
    let path = replay_path(&input.url)?;

    let mut headers = Vec::with_capacity(input.headers.len());
    for (name, value) in &input.headers {
        if HOP_BY_HOP_HEADERS
            .iter()
            .any(|hop| hop.eq_ignore_ascii_case(name))
        {
            continue;
        }
        push_header_values(&mut headers, name, value);
    }

    let body = if method.carries_body() {
        input.raw_body().map(<[u8]>::to_vec)
    } else {
        None
    };

    Ok(ReplayRequest {
        method,
        scheme: target.provider,
        host: target.host.clone(),
        port: target.port,
        path,
        headers,
        body,
        verify_tls: target.verify_tls,
    })
}

fn push_header_values(headers: &mut Vec<(String, String)>, name: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(text) => headers.push((name.to_string(), text.clone())),
        Value::Array(values) => {
            for value in values {
                push_header_values(headers, name, value);
            }
        }
        Value::Bool(_) | Value::Number(_) | Value::Object(_) => {
            headers.push((name.to_string(), value.to_string()))
        }
    }
}

/// Path and query to request on the target, derived from the captured URL.
pub fn replay_path(url: &str) -> Result<String, TranslateError> {
    let raw = raw_path(url);
    let decoded = urlencoding::decode(&raw).map_err(|e| TranslateError::MalformedUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(encode_path(&decoded))
}

/// Re-escape a decoded path: spaces become `%20` before the first `?` and
/// `+` after it. Characters a URL parser would treat as a fragment start, a
/// path separator or drop outright (`#`, `\` in the path, controls) are
/// percent-encoded so the target sees the whole path.
pub fn encode_path(decoded: &str) -> String {
    match decoded.split_once('?') {
        Some((path, query)) => format!(
            "{}?{}",
            escape_part(path, "%20", true),
            escape_part(query, "+", false)
        ),
        None => escape_part(decoded, "%20", true),
    }
}

fn escape_part(text: &str, space: &str, in_path: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            ' ' => out.push_str(space),
            '#' => out.push_str("%23"),
            '\\' if in_path => out.push_str("%5C"),
            c if c.is_ascii_control() => {
                let _ = write!(out, "%{:02X}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out
}

/// Undecoded path and query of an absolute or origin-relative URL.
fn raw_path(url: &str) -> String {
    let without_fragment = url.split_once('#').map_or(url, |(before, _)| before);
    let after_authority = match without_fragment.find("://") {
        Some(idx) => {
            let rest = &without_fragment[idx + 3..];
            let end = rest.find(['/', '?']).unwrap_or(rest.len());
            &rest[end..]
        }
        None => without_fragment,
    };
    if after_authority.starts_with('/') {
        after_authority.to_string()
    } else {
        format!("/{after_authority}")
    }
}
