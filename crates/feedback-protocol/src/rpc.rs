//! JSON-RPC 2.0 envelopes and MCP tool argument types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SessionId;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const DEFAULT_PROJECT_DIRECTORY: &str = ".";
pub const DEFAULT_SUMMARY: &str = "I have completed the task you requested.";

/// An incoming JSON-RPC call. Every field is optional on the wire so that a
/// malformed request can still be answered with the caller's `id`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code: code.code(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Error codes for structured error handling.
///
/// The first five are the standard JSON-RPC codes; the rest live in the
/// implementation-defined server error range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    SessionNotFound,
    AccessDenied,
    SessionTerminal,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::SessionNotFound => -32001,
            ErrorCode::AccessDenied => -32002,
            ErrorCode::SessionTerminal => -32003,
        }
    }
}

/// Parameters of `tools/call`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Arguments of the `interactive_feedback` tool.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InteractiveFeedbackArgs {
    #[serde(default = "default_project_directory")]
    pub project_directory: String,
    #[serde(default = "default_summary")]
    pub summary: String,
    /// Seconds; falls back to the server's configured default.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Default for InteractiveFeedbackArgs {
    fn default() -> Self {
        Self {
            project_directory: default_project_directory(),
            summary: default_summary(),
            timeout: None,
        }
    }
}

/// Arguments of the `get_session_status` tool.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionStatusArgs {
    pub session_id: SessionId,
}

/// Arguments of the `wait_for_feedback` tool.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WaitForFeedbackArgs {
    pub session_id: SessionId,
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_project_directory() -> String {
    DEFAULT_PROJECT_DIRECTORY.to_string()
}

fn default_summary() -> String {
    DEFAULT_SUMMARY.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_response_shape() {
        let resp = RpcResponse::error(Some(json!(7)), ErrorCode::MethodNotFound, "nope");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "error": {"code": -32601, "message": "nope"}
            })
        );
    }

    #[test]
    fn ok_response_keeps_null_id() {
        let resp = RpcResponse::ok(None, json!({"tools": []}));
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("id").unwrap().is_null());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn request_tolerates_missing_fields() {
        let req: RpcRequest = serde_json::from_str(r#"{"id":"a"}"#).unwrap();
        assert_eq!(req.id, Some(json!("a")));
        assert!(req.method.is_none());
        assert!(req.params.is_none());
    }

    #[test]
    fn interactive_feedback_defaults() {
        let args: InteractiveFeedbackArgs = serde_json::from_value(json!({})).unwrap();
        assert_eq!(args.project_directory, ".");
        assert_eq!(args.summary, DEFAULT_SUMMARY);
        assert!(args.timeout.is_none());
    }

    #[test]
    fn server_error_codes_are_in_reserved_range() {
        for code in [
            ErrorCode::SessionNotFound,
            ErrorCode::AccessDenied,
            ErrorCode::SessionTerminal,
        ] {
            assert!((-32099..=-32000).contains(&code.code()));
        }
    }
}
