use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Device discovery
        .route("/devices", get(handlers::list_devices))
        // Session control
        .route("/session/connect", post(handlers::connect_session))
        .route("/session/disconnect", post(handlers::disconnect_session))
        // Session queries
        .route("/session/status", get(handlers::get_session_status))
        .route("/session/transcript", get(handlers::get_session_transcript))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
