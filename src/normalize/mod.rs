//! Shared building blocks for per-capability output normalizers.
//!
//! Each capability owns its own normalizer (see `catalog`); this module only
//! holds the pieces they agree on: how a failed exit becomes `ToolFailed`,
//! how text is decoded, and how truncated output is cut back to whole lines.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::execution::{RawResult, Termination};

/// Cap on captured stderr carried in a `ToolFailed` message.
pub const STDERR_MESSAGE_CAP: usize = 4 * 1024;

/// Why a normalizer refused a raw result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    /// The tool ran and reported failure.
    #[error("tool failed with {status}: {detail}")]
    ToolFailed { status: String, detail: String },

    /// The tool reported success but its output does not fit the expected shape.
    #[error("unrecognized output: {0}")]
    Malformed(String),
}

impl NormalizeError {
    pub fn malformed(message: impl Into<String>) -> Self {
        NormalizeError::Malformed(message.into())
    }
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub fn cap_text(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Build the `ToolFailed` error for `raw`, carrying its stderr (or stdout when
/// stderr is empty), size-capped.
pub fn tool_failed(raw: &RawResult) -> NormalizeError {
    let stderr = raw.stderr_lossy();
    let stdout = raw.stdout_lossy();
    let source = if stderr.trim().is_empty() { &stdout } else { &stderr };
    let detail = cap_text(source.trim(), STDERR_MESSAGE_CAP);
    NormalizeError::ToolFailed {
        status: raw.termination.to_string(),
        detail: if detail.is_empty() {
            "no output".to_string()
        } else {
            detail.to_string()
        },
    }
}

/// Accept the result only if it exited with one of `accepted` codes.
/// Returns the exit code so callers can branch on meaningful non-zero codes.
pub fn require_exit(raw: &RawResult, accepted: &[i32]) -> Result<i32, NormalizeError> {
    match raw.termination {
        Termination::Exited(code) if accepted.contains(&code) => Ok(code),
        _ => Err(tool_failed(raw)),
    }
}

/// Accept only exit status 0.
pub fn require_success(raw: &RawResult) -> Result<(), NormalizeError> {
    require_exit(raw, &[0]).map(|_| ())
}

/// Decode stdout as UTF-8.
///
/// When stdout was truncated the cap may split a multi-byte character; the
/// incomplete tail is dropped. Invalid UTF-8 anywhere else is malformed.
pub fn stdout_text(raw: &RawResult) -> Result<Cow<'_, str>, NormalizeError> {
    decode(&raw.stdout, raw.stdout_truncated, "stdout")
}

fn decode<'a>(bytes: &'a [u8], truncated: bool, stream: &str) -> Result<Cow<'a, str>, NormalizeError> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(Cow::Borrowed(text)),
        Err(e) if truncated && e.error_len().is_none() => {
            let valid = &bytes[..e.valid_up_to()];
            // valid_up_to guarantees this prefix decodes.
            Ok(String::from_utf8_lossy(valid))
        }
        Err(e) => Err(NormalizeError::malformed(format!(
            "{} is not valid UTF-8 (at byte {})",
            stream,
            e.valid_up_to()
        ))),
    }
}

/// Split `text` into lines, dropping the final line when the output was
/// truncated and that line has no terminator (it was cut mid-line).
pub fn complete_lines(text: &str, truncated: bool) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().collect();
    if truncated && !text.ends_with('\n') {
        lines.pop();
    }
    lines
}

/// Parse stdout as a single JSON document. A truncated document is never
/// partially parsed.
pub fn parse_json<T: DeserializeOwned>(raw: &RawResult) -> Result<T, NormalizeError> {
    if raw.stdout_truncated {
        return Err(NormalizeError::malformed(format!(
            "JSON output truncated at {} bytes",
            raw.stdout.len()
        )));
    }
    let text = stdout_text(raw)?;
    if text.trim().is_empty() {
        return Err(NormalizeError::malformed("expected a JSON document, got no output"));
    }
    serde_json::from_str(&text).map_err(|e| NormalizeError::malformed(format!("invalid JSON: {}", e)))
}

/// Serialize a typed payload into the response value.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Value, NormalizeError> {
    serde_json::to_value(value)
        .map_err(|e| NormalizeError::malformed(format!("payload not serializable: {}", e)))
}
