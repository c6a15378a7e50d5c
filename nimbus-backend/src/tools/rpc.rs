//! JSON-RPC 2.0 message shapes for the tool-provider protocol.
//!
//! Request/response runs over HTTP POST. A `tools/call` that cannot complete
//! synchronously answers with a `stream/start` directive instead of a result;
//! the indicated stream then carries `stream/chunk` / `stream/end` messages
//! until one of them is terminal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_STREAM_START: &str = "stream/start";
pub const METHOD_STREAM_CHUNK: &str = "stream/chunk";
pub const METHOD_STREAM_END: &str = "stream/end";

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        RpcRequest {
            jsonrpc: "2.0",
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Parsed provider reply to a `tools/*` call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply {
    /// Synchronous result — captured immediately.
    Result(Value),
    /// Asynchronous hand-off: open the stream and await a terminal event.
    StreamStart { ws_url: String },
    /// JSON-RPC error object — short-circuits the call.
    Error(RpcError),
}

impl RpcReply {
    pub fn parse(body: &Value) -> Result<RpcReply, String> {
        if let Some(error) = body.get("error") {
            let error: RpcError = serde_json::from_value(error.clone())
                .map_err(|e| format!("malformed JSON-RPC error object: {}", e))?;
            return Ok(RpcReply::Error(error));
        }

        if body.get("method").and_then(|m| m.as_str()) == Some(METHOD_STREAM_START) {
            let ws_url = body
                .get("params")
                .and_then(|p| p.get("ws_url"))
                .and_then(|u| u.as_str())
                .ok_or("stream/start directive missing params.ws_url")?;
            return Ok(RpcReply::StreamStart { ws_url: ws_url.to_string() });
        }

        if let Some(result) = body.get("result") {
            return Ok(RpcReply::Result(result.clone()));
        }

        Err(format!("unrecognized JSON-RPC reply: {}", body))
    }
}

/// A message observed on an open provider stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: StreamParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl StreamMessage {
    /// A message is terminal when it is a `stream/chunk` or `stream/end`
    /// carrying a result or error payload. Everything else (progress,
    /// keep-alive probes) is ignored by callers.
    pub fn terminal_outcome(&self) -> Option<Result<Value, String>> {
        let method = self.method.as_deref()?;
        if method != METHOD_STREAM_CHUNK && method != METHOD_STREAM_END {
            return None;
        }
        if let Some(error) = &self.params.error {
            return Some(Err(render_error_payload(error)));
        }
        self.params.result.clone().map(Ok)
    }
}

/// Error payloads arrive as bare strings or `{message}` objects.
fn render_error_payload(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string())
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sync_result() {
        let reply = RpcReply::parse(&json!({"jsonrpc": "2.0", "id": "1", "result": {"time": "14:32"}}))
            .unwrap();
        assert_eq!(reply, RpcReply::Result(json!({"time": "14:32"})));
    }

    #[test]
    fn test_parse_stream_start() {
        let reply = RpcReply::parse(&json!({
            "method": "stream/start",
            "params": {"ws_url": "ws://localhost:9001/stream/abc"}
        }))
        .unwrap();
        assert_eq!(
            reply,
            RpcReply::StreamStart { ws_url: "ws://localhost:9001/stream/abc".to_string() }
        );
    }

    #[test]
    fn test_error_object_short_circuits() {
        let reply = RpcReply::parse(&json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": {"code": -32601, "message": "method not found"}
        }))
        .unwrap();
        match reply {
            RpcReply::Error(e) => assert_eq!(e.message, "method not found"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_keepalive_is_not_terminal() {
        let msg: StreamMessage =
            serde_json::from_value(json!({"method": "stream/keepalive"})).unwrap();
        assert!(msg.terminal_outcome().is_none());

        let msg: StreamMessage =
            serde_json::from_value(json!({"method": "stream/chunk", "params": {}})).unwrap();
        assert!(msg.terminal_outcome().is_none());
    }

    #[test]
    fn test_stream_end_with_error_is_terminal() {
        let msg: StreamMessage = serde_json::from_value(json!({
            "method": "stream/end",
            "params": {"error": {"message": "upstream exploded"}}
        }))
        .unwrap();
        assert_eq!(msg.terminal_outcome(), Some(Err("upstream exploded".to_string())));
    }

    #[test]
    fn test_stream_chunk_with_result_is_terminal() {
        let msg: StreamMessage = serde_json::from_value(json!({
            "method": "stream/chunk",
            "params": {"result": {"content": [{"type": "text", "text": "done"}]}}
        }))
        .unwrap();
        assert!(matches!(msg.terminal_outcome(), Some(Ok(_))));
    }
}
