use super::state::AppState;
use crate::error::LiveError;
use crate::session::{SessionConfig, SessionStats, SessionStatus, TranscriptSegment};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    /// Model identifier (default: configured model)
    pub model: Option<String>,

    /// Prebuilt voice name (default: configured voice)
    pub voice_name: Option<String>,

    /// System prompt (default: configured instruction)
    pub system_instruction: Option<String>,

    /// Input device identifier from GET /devices
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub status: SessionStatus,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// Status code for an error surfaced by the controller
pub fn status_for(error: &LiveError) -> StatusCode {
    match error {
        LiveError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        LiveError::DeviceUnavailable(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /devices
/// List input devices (may trigger the OS microphone prompt)
pub async fn list_devices(State(state): State<AppState>) -> Response {
    let controller = Arc::clone(&state.controller);

    match tokio::task::spawn_blocking(move || controller.list_input_devices()).await {
        Ok(Ok(devices)) => (StatusCode::OK, Json(devices)).into_response(),
        Ok(Err(e)) => {
            error!("Failed to list input devices: {}", e);
            error_response(status_for(&e), e.to_string())
        }
        Err(e) => {
            error!("Device enumeration task failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Device enumeration failed: {}", e),
            )
        }
    }
}

/// POST /session/connect
/// Start a live session, replacing any current one
pub async fn connect_session(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> Response {
    let defaults = &state.defaults;
    let config = SessionConfig {
        model: req.model.unwrap_or_else(|| defaults.model.clone()),
        voice_name: req.voice_name.unwrap_or_else(|| defaults.voice_name.clone()),
        system_instruction: req
            .system_instruction
            .unwrap_or_else(|| defaults.system_instruction.clone()),
        device_id: req.device_id,
    };

    info!("Connecting session (model {}, voice {})", config.model, config.voice_name);

    match state.controller.connect(config, None).await {
        Ok(session_id) => (
            StatusCode::OK,
            Json(ConnectResponse {
                session_id: session_id.clone(),
                status: state.controller.status(),
                message: format!("Session {} connecting", session_id),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to connect session: {}", e);
            error_response(status_for(&e), format!("Failed to connect session: {}", e))
        }
    }
}

/// POST /session/disconnect
/// End the live session (no-op when there is none)
pub async fn disconnect_session(State(state): State<AppState>) -> Response {
    let stats = state.controller.disconnect().await;

    (
        StatusCode::OK,
        Json(DisconnectResponse {
            status: stats.status,
            message: "Session disconnected".to_string(),
            stats,
        }),
    )
        .into_response()
}

/// GET /session/status
pub async fn get_session_status(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.controller.stats())).into_response()
}

/// GET /session/transcript
/// Text received so far in the current session
pub async fn get_session_transcript(State(state): State<AppState>) -> Response {
    let transcript: Vec<TranscriptSegment> = state.controller.transcript();
    (StatusCode::OK, Json(transcript)).into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
