pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod session;

pub use audio::{
    AudioCaptureEngine, AudioChunk, AudioDevices, CaptureBackend, CaptureConfig, DeviceSelector,
    PlaybackScheduler,
};
pub use config::Config;
pub use error::LiveError;
pub use http::{create_router, AppState};
pub use live::{ConnectionSession, Connector, ProtocolMessage, Transport, WsConnector};
pub use session::{
    ControllerSettings, SessionConfig, SessionController, SessionStats, SessionStatus,
    TranscriptEvent, TranscriptSegment,
};
