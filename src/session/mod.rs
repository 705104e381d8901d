//! Live session management
//!
//! This module provides the `SessionController`, which owns:
//! - The capture device and its chunker
//! - The connection to the live service
//! - The playback scheduler and output device
//! - Transcript collection and session statistics

mod config;
mod controller;
mod stats;

pub use config::{ControllerSettings, SessionConfig};
pub use controller::SessionController;
pub use stats::{SessionStats, SessionStatus, TranscriptEvent, TranscriptSegment, TranscriptSink};
