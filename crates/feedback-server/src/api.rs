use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use feedback_protocol::paths::session_path;
use feedback_protocol::rpc::RpcResponse;
use feedback_protocol::{CancelRequest, Feedback, SubmitRequest};
use libfeedback::FeedbackService;

use crate::rpc;

pub struct AppState {
    pub service: Arc<FeedbackService>,
}

type ApiResult = Result<Json<Value>, (StatusCode, String)>;

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// POST /mcp - JSON-RPC endpoint for agents.
pub async fn mcp(State(state): State<Arc<AppState>>, body: Bytes) -> Json<RpcResponse> {
    Json(rpc::handle_body(&state.service, &body).await)
}

/// GET / - Service description and endpoint map.
pub async fn root() -> Json<Value> {
    Json(json!({
        "name": rpc::SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "mcp": "/mcp",
            "session": session_path("{session_id}"),
            "sessions": "/sessions",
            "health": "/health",
        }
    }))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.service.list_sessions(false).len(),
    }))
}

/// GET /sessions - Live sessions, oldest first.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "sessions": state.service.list_sessions(false) }))
}

/// GET /session/{id}?token=... - The human's view of a session.
pub async fn session_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> ApiResult {
    authorize(&state, &id, &query)?;
    let snapshot = state
        .service
        .get_session(&id)
        .ok_or_else(not_found)?;
    Ok(Json(json!({
        "session": snapshot,
        "actions": {
            "feedback": format!("{}/feedback", session_path(&id)),
            "submit": format!("{}/submit", session_path(&id)),
            "cancel": format!("{}/cancel", session_path(&id)),
        }
    })))
}

/// POST /session/{id}/feedback - Append one feedback item.
pub async fn add_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    Json(feedback): Json<Feedback>,
) -> ApiResult {
    authorize(&state, &id, &query)?;
    let kind = feedback.kind();
    if !state.service.submit_feedback(&id, feedback) {
        return Err(rejected(&state, &id));
    }
    debug!(session_id = %id, kind = ?kind, "feedback received over http");
    Ok(Json(json!({ "accepted": true })))
}

/// POST /session/{id}/submit - Finish the session with the human's result.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult {
    authorize(&state, &id, &query)?;
    if !state.service.finish(&id, request.result) {
        return Err(rejected(&state, &id));
    }
    Ok(Json(json!({ "status": "completed" })))
}

/// POST /session/{id}/cancel - Abort the session.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    Json(request): Json<CancelRequest>,
) -> ApiResult {
    authorize(&state, &id, &query)?;
    if !state.service.abort(&id, &request.message) {
        return Err(rejected(&state, &id));
    }
    Ok(Json(json!({ "status": "error", "message": request.message })))
}

fn authorize(state: &AppState, id: &str, query: &TokenQuery) -> Result<(), (StatusCode, String)> {
    state
        .service
        .authorize(id, query.token.as_deref())
        .map_err(|e| (StatusCode::FORBIDDEN, e.to_error_code().1))
}

fn not_found() -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, "session not found".to_string())
}

/// Status for a write the session refused: gone, or already finished.
fn rejected(state: &AppState, id: &str) -> (StatusCode, String) {
    if state.service.get_session(id).is_none() {
        not_found()
    } else {
        (
            StatusCode::CONFLICT,
            "session is already finished".to_string(),
        )
    }
}
