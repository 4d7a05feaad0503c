//! Shared utilities for the relay.

/// Bodies longer than this are previewed by their edges only.
pub const PREVIEW_THRESHOLD: usize = 40;

/// Bytes kept from each end of a long body.
pub const PREVIEW_EDGE: usize = 20;

/// Marker placed between the two edges of a long preview.
pub const PREVIEW_SEPARATOR: &str = "......";

/// Headers whose values are never logged.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
];

/// Short textual preview of a response body.
///
/// Bodies up to [`PREVIEW_THRESHOLD`] bytes are rendered whole; longer ones
/// as the first and last [`PREVIEW_EDGE`] bytes joined by
/// [`PREVIEW_SEPARATOR`]. Each byte becomes one Latin-1 character, so a
/// cut through a multibyte sequence loses nothing.
pub fn render_preview(body: &[u8]) -> String {
    if body.len() <= PREVIEW_THRESHOLD {
        return latin1(body);
    }
    let head = latin1(&body[..PREVIEW_EDGE]);
    let tail = latin1(&body[body.len() - PREVIEW_EDGE..]);
    format!("{head}{PREVIEW_SEPARATOR}{tail}")
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Mask a secret before logging, keeping a short prefix for recognition.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "***".to_string()
    } else {
        format!("{prefix}***")
    }
}

/// Whether a header's value must be masked in logs.
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(name))
}
