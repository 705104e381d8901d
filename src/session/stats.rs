use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Controller status as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    Error,
}

/// Statistics about the current (or last) live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub status: SessionStatus,

    /// Identifier of the current session, if one exists
    pub session_id: Option<String>,

    /// When the session was connected
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`
    pub duration_secs: f64,

    /// Chunks written to the connection
    pub chunks_sent: u64,

    /// Chunks dropped by capture or the outbound queue
    pub chunks_dropped: u64,

    /// Inbound audio chunks scheduled for playback
    pub chunks_received: u64,

    pub transcript_segments_count: usize,

    /// Whether model audio is playing right now
    pub is_speaking: bool,

    /// Latest input RMS level (0.0 to 1.0)
    pub input_level: f32,
}

/// A text fragment received from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,

    /// Model turn the fragment belongs to, counting from 0
    pub turn: u32,
}

/// Delivered to the caller's transcript callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Text(String),
    TurnComplete,
    /// An error frame from the service; the session stays up
    RemoteError(String),
}

pub type TranscriptSink = Arc<dyn Fn(TranscriptEvent) + Send + Sync>;
