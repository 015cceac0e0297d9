//! API routes for saged.

use crate::orchestrator::{sse_response, ChannelSink, EngineError, StreamSink, GENERIC_ERROR_MSG};
use crate::server::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sage_common::{validate_message, ChatRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

type AppStateArc = Arc<AppState>;

// ============================================================================
// Chat routes
// ============================================================================

pub fn chat_routes() -> Router<AppStateArc> {
    Router::new().route("/api/chat", post(chat))
}

/// Process one chat request, streaming the answer as SSE.
///
/// Input validation happens here, before any model call. The orchestration
/// itself runs in a spawned task writing into the stream channel; the
/// defensive catch-all below guarantees the client still receives exactly
/// one terminal event if the engine fails unexpectedly.
async fn chat(
    State(state): State<AppStateArc>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let message = req.message.trim().to_string();
    validate_message(&message).map_err(|rejection| {
        info!("rejected chat request: {}", rejection);
        (StatusCode::BAD_REQUEST, rejection.to_string())
    })?;

    info!("processing chat request ({} chars)", message.chars().count());

    let (sink, rx) = ChannelSink::channel();
    let engine = state.engine.clone();

    tokio::spawn(async move {
        match engine.run(&message, &sink).await {
            Ok(()) => {}
            Err(EngineError::Disconnected) => {
                info!("client disconnected, run stopped");
            }
            Err(e) => {
                error!("chat run failed: {}", e);
                // The sink latches on terminal events, so this is a no-op
                // if the engine already ended the stream.
                let _ = sink.error(GENERIC_ERROR_MSG);
            }
        }
    });

    Ok(sse_response(rx))
}

// ============================================================================
// Health routes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
