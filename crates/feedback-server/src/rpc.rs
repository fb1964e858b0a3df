//! JSON-RPC dispatch for `POST /mcp`.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use feedback_protocol::rpc::{
    DEFAULT_PROJECT_DIRECTORY, DEFAULT_SUMMARY, ErrorCode, InteractiveFeedbackArgs,
    MCP_PROTOCOL_VERSION, RpcRequest, RpcResponse, SessionStatusArgs, ToolCall,
    WaitForFeedbackArgs,
};
use libfeedback::{FeedbackService, FeedbackTicket, SessionError};

pub const SERVER_NAME: &str = "feedback-broker";

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl DispatchError {
    fn to_error_code(&self) -> (ErrorCode, String) {
        match self {
            Self::MethodNotFound(_) => (ErrorCode::MethodNotFound, self.to_string()),
            Self::InvalidParams(_) => (ErrorCode::InvalidParams, self.to_string()),
            Self::Session(e) => e.to_error_code(),
        }
    }
}

/// Handle one raw request body. Always yields a response; protocol errors
/// are reported in-band.
pub async fn handle_body(service: &FeedbackService, body: &[u8]) -> RpcResponse {
    if body.is_empty() {
        return RpcResponse::error(None, ErrorCode::InvalidRequest, "empty request body");
    }
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return RpcResponse::error(None, ErrorCode::ParseError, format!("parse error: {e}"));
        }
    };
    if !value.is_object() {
        return RpcResponse::error(
            None,
            ErrorCode::InvalidRequest,
            "request must be a JSON object",
        );
    }
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return RpcResponse::error(
                None,
                ErrorCode::InvalidRequest,
                format!("malformed request: {e}"),
            );
        }
    };
    handle_request(service, request).await
}

pub async fn handle_request(service: &FeedbackService, request: RpcRequest) -> RpcResponse {
    let RpcRequest {
        id, method, params, ..
    } = request;
    let Some(method) = method else {
        return RpcResponse::error(id, ErrorCode::InvalidRequest, "missing method");
    };
    debug!(method = %method, "rpc request");

    match dispatch(service, &method, params).await {
        Ok(result) => RpcResponse::ok(id, result),
        Err(e) => {
            let (code, message) = e.to_error_code();
            debug!(method = %method, code = code.code(), error = %e, "rpc request failed");
            RpcResponse::error(id, code, message)
        }
    }
}

async fn dispatch(
    service: &FeedbackService,
    method: &str,
    params: Option<Value>,
) -> Result<Value, DispatchError> {
    match method {
        "initialize" => Ok(initialize()),
        "tools/list" => Ok(tools_list()),
        "tools/call" => {
            let call: ToolCall = parse_params(params)?;
            call_tool(service, call).await
        }
        other => Err(DispatchError::MethodNotFound(other.to_string())),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, DispatchError> {
    let params = match params {
        None | Some(Value::Null) => json!({}),
        Some(params) => params,
    };
    serde_json::from_value(params).map_err(|e| DispatchError::InvalidParams(e.to_string()))
}

fn initialize() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {
            "tools": { "listChanged": true }
        }
    })
}

fn tools_list() -> Value {
    json!({
        "tools": [
            {
                "name": "interactive_feedback",
                "description": "Open a feedback session and return the URL a human uses to respond.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "project_directory": {
                            "type": "string",
                            "description": "Project directory the work was done in",
                            "default": DEFAULT_PROJECT_DIRECTORY,
                        },
                        "summary": {
                            "type": "string",
                            "description": "Summary of the work to review",
                            "default": DEFAULT_SUMMARY,
                        },
                        "timeout": {
                            "type": "integer",
                            "description": "Seconds to wait for the human",
                            "default": 600,
                        }
                    }
                }
            },
            {
                "name": "get_session_status",
                "description": "Report the current state of a feedback session.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "session_id": { "type": "string" }
                    },
                    "required": ["session_id"]
                }
            },
            {
                "name": "wait_for_feedback",
                "description": "Block until the session is finished or the wait times out.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "session_id": { "type": "string" },
                        "timeout": {
                            "type": "integer",
                            "description": "Seconds to wait; defaults to the session's own timeout",
                        }
                    },
                    "required": ["session_id"]
                }
            }
        ]
    })
}

async fn call_tool(service: &FeedbackService, call: ToolCall) -> Result<Value, DispatchError> {
    match call.name.as_str() {
        "interactive_feedback" => {
            let args: InteractiveFeedbackArgs = parse_params(call.arguments)?;
            let ticket = service.request_feedback(&args.project_directory, &args.summary, args.timeout)?;
            info!(session_id = %ticket.session_id, "interactive feedback session opened");
            Ok(json!({
                "content": [text_block(ticket_text(&ticket))],
                "session_info": ticket,
            }))
        }
        "get_session_status" => {
            let args: SessionStatusArgs = parse_params(call.arguments)?;
            let report = service.get_status(&args.session_id);
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|e| SessionError::Internal(e.to_string()))?;
            Ok(json!({
                "content": [text_block(rendered)],
                "session_status": report,
            }))
        }
        "wait_for_feedback" => {
            let args: WaitForFeedbackArgs = parse_params(call.arguments)?;
            let result = service.await_result(&args.session_id, args.timeout).await;
            let status = if result.is_some() {
                "completed"
            } else {
                "timeout_or_failed"
            };
            debug!(session_id = %args.session_id, status, "wait for feedback returned");
            Ok(json!({
                "content": [text_block(format!("session {}: {status}", args.session_id))],
                "status": status,
                "result": result,
            }))
        }
        other => Err(DispatchError::InvalidParams(format!("unknown tool: {other}"))),
    }
}

fn text_block(text: String) -> Value {
    json!({ "type": "text", "text": text })
}

fn ticket_text(ticket: &FeedbackTicket) -> String {
    format!(
        "Interactive feedback session created.\n\n\
         Open this URL to respond:\n{}\n\n\
         Session ID: {}\n\
         Project directory: {}\n\
         Timeout: {} seconds",
        ticket.url, ticket.session_id, ticket.project_directory, ticket.timeout
    )
}
