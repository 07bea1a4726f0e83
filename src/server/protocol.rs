//! JSON-RPC 2.0 envelopes and the tool-protocol payloads built on them.

use serde_json::{json, Map, Value};

use crate::capabilities::{CapabilityDescriptor, ProfileId};
use crate::dispatch::{CallOutcome, CallRequest, Completion, RequestId};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// An inbound request or notification. Notifications carry no `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    /// Read a request out of a decoded message. On failure the error is the
    /// ready-to-send JSON-RPC error response.
    pub fn parse(message: Value) -> Result<Self, Value> {
        let Value::Object(mut object) = message else {
            return Err(failure(Value::Null, INVALID_REQUEST, "Invalid request: expected an object"));
        };
        let id = object.remove("id").filter(|id| !id.is_null());
        let reply_id = id.clone().unwrap_or(Value::Null);

        match object.get("jsonrpc") {
            None => {}
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            Some(_) => {
                return Err(failure(reply_id, INVALID_REQUEST, "Invalid request: jsonrpc must be \"2.0\""))
            }
        }
        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err(failure(reply_id, INVALID_REQUEST, "Invalid request: missing method")),
        };
        Ok(Self {
            id,
            method,
            params: object.remove("params").unwrap_or(Value::Null),
        })
    }
}

pub fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        },
    })
}

pub fn initialize_result(profile: ProfileId) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false },
        },
        "serverInfo": {
            "name": "xcprobe",
            "version": crate::VERSION,
        },
        "instructions": format!("Active capability profile: {}", profile),
    })
}

pub fn tools_list_result(descriptors: &[CapabilityDescriptor]) -> Value {
    json!({ "tools": descriptors })
}

/// Correlation id carried into the error envelope. Ids that are neither an
/// integer nor a string are echoed on the response but not in the envelope.
pub fn request_id_of(id: &Value) -> Option<RequestId> {
    match id {
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        Value::String(s) => Some(RequestId::Text(s.clone())),
        _ => None,
    }
}

/// Build the call request for `tools/call` params. Errors are the
/// `INVALID_PARAMS` message.
pub fn call_request(id: &Value, params: &Value) -> Result<CallRequest, String> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| "Invalid params: tools/call requires a string 'name'".to_string())?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    let mut request = CallRequest::new(name, arguments);
    request.request_id = request_id_of(id);
    Ok(request)
}

fn content_blocks(value: &Value) -> Vec<Value> {
    let image = match (
        value.get("mime_type").and_then(Value::as_str),
        value.get("data").and_then(Value::as_str),
    ) {
        (Some(mime), Some(data)) if mime.starts_with("image/") => Some((mime, data)),
        _ => None,
    };
    match image {
        Some((mime, data)) => {
            let summary: Map<String, Value> = value
                .as_object()
                .map(|o| o.iter().filter(|(k, _)| *k != "data").map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            vec![
                json!({ "type": "image", "data": data, "mimeType": mime }),
                json!({ "type": "text", "text": Value::Object(summary).to_string() }),
            ]
        }
        None => vec![json!({ "type": "text", "text": value.to_string() })],
    }
}

/// The `tools/call` result for one outcome. Errors are results too, flagged
/// with `isError` and carrying the envelope as structured content.
pub fn call_result(outcome: &CallOutcome) -> Value {
    match &outcome.completion {
        Completion::Result(value) => json!({
            "content": content_blocks(value),
            "structuredContent": value,
            "isError": false,
        }),
        Completion::Error(envelope) => json!({
            "content": [{ "type": "text", "text": envelope.to_string() }],
            "structuredContent": envelope,
            "isError": true,
        }),
    }
}
