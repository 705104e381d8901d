use thiserror::Error;

/// Errors raised by the live voice pipeline.
///
/// Device errors are returned from `connect()`; transport and protocol
/// errors arrive later through the controller status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LiveError {
    /// Microphone access was refused by the user or the OS
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input or output device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// An opened device failed or disappeared
    #[error("audio device failed: {0}")]
    Device(String),

    /// Socket-level failure (connect, send or receive)
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound frame could not be decoded; never fatal
    #[error("could not decode inbound frame: {0}")]
    ProtocolDecode(String),

    /// Outbound message could not be encoded
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote side ended the connection
    #[error("connection closed by remote: {0}")]
    RemoteClosed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LiveError {
    /// Whether this error ends the session it occurred in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LiveError::ProtocolDecode(_))
    }
}
