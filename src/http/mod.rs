//! HTTP API for controlling the live session
//!
//! - GET /health - Health check
//! - GET /devices - List input devices
//! - POST /session/connect - Start a live session (replacing any current one)
//! - POST /session/disconnect - End the live session
//! - GET /session/status - Query session status
//! - GET /session/transcript - Get accumulated transcript

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, SessionDefaults};
