use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use libfeedback::FeedbackService;

use crate::api::{self, AppState};
use crate::config::BrokerConfig;

pub fn router(service: Arc<FeedbackService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(api::root))
        .route("/health", get(api::health))
        .route("/mcp", post(api::mcp))
        .route("/sessions", get(api::list_sessions))
        .route("/session/{id}", get(api::session_view))
        .route("/session/{id}/feedback", post(api::add_feedback))
        .route("/session/{id}/submit", post(api::submit))
        .route("/session/{id}/cancel", post(api::cancel))
        .layer(cors)
        .with_state(Arc::new(AppState { service }))
}

pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    config.validate()?;
    let service = Arc::new(FeedbackService::new(config.to_service_config()));
    let app = router(Arc::clone(&service));

    let bind = config.bind_address();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind feedback listener on {bind}"))?;
    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        public_url = %service.base_url(),
        require_token = config.require_token,
        "feedback broker listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("shutting down...");
    service.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}
