//! The error taxonomy shared by every call outcome.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Caller-supplied correlation id, echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Text(s.to_string())
    }
}

/// Which stage of a call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Name absent from the active profile. The adapter is never invoked.
    UnknownCapability,
    /// Arguments fail the input schema or cannot form a plan.
    InvalidArguments,
    /// The action could not be started at all.
    ExecutionStartFailed,
    /// The deadline passed; the action was killed.
    TimedOut,
    /// The action ran and reported failure.
    ToolFailed,
    /// The action reported success but its output could not be shaped.
    NormalizationFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownCapability => "UnknownCapability",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::ExecutionStartFailed => "ExecutionStartFailed",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::ToolFailed => "ToolFailed",
            ErrorKind::NormalizationFailed => "NormalizationFailed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error shape that leaves the dispatch engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind} ({capability_name}): {message}")]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    pub capability_name: String,
    pub request_id: Option<RequestId>,
}

impl ErrorEnvelope {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        capability_name: impl Into<String>,
        request_id: Option<RequestId>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            capability_name: capability_name.into(),
            request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = ErrorEnvelope::new(
            ErrorKind::TimedOut,
            "deadline of 2s passed",
            "record_trace",
            Some(RequestId::Number(7)),
        );
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "kind": "TimedOut",
                "message": "deadline of 2s passed",
                "capabilityName": "record_trace",
                "requestId": 7,
            })
        );
        assert_eq!(envelope.to_string(), "TimedOut (record_trace): deadline of 2s passed");
    }

    #[test]
    fn test_request_id_untagged() {
        let id: RequestId = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(id, RequestId::from("abc"));
        let id: RequestId = serde_json::from_value(json!(12)).unwrap();
        assert_eq!(id, RequestId::from(12i64));
        assert_eq!(id.to_string(), "12");
    }
}
