use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::output::AudioOutput;
use crate::error::LiveError;

/// Which input device to capture from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    /// The host's default input device
    #[default]
    Default,
    /// A device identifier as returned by [`AudioDevices::list_input_devices`]
    Id(String),
}

impl DeviceSelector {
    pub fn from_id(id: Option<String>) -> Self {
        match id {
            Some(id) if !id.is_empty() => DeviceSelector::Id(id),
            _ => DeviceSelector::Default,
        }
    }
}

/// An input device as presented to callers before connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDeviceInfo {
    /// Stable identifier to pass back as [`DeviceSelector::Id`]
    pub id: String,
    /// Human-readable label
    pub label: String,
    /// Whether this is the host's default input
    pub is_default: bool,
}

/// What the capture engine asks a backend for
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub device: DeviceSelector,
    /// Rate the backend must deliver frames at (resampling if needed)
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

/// Called from the audio thread with each mono frame
pub type FrameCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Called from the audio thread when the device fails after opening
pub type ErrorCallback = Box<dyn FnMut(LiveError) + Send + 'static>;

/// Audio capture backend trait
///
/// Implementations:
/// - [`super::host::CpalBackend`]: system microphone via cpal
/// - [`super::file::FileBackend`]: a WAV file replayed in real time
///
/// Backends deliver mono frames at `CaptureRequest::sample_rate` and must
/// never block inside the frame callback.
pub trait CaptureBackend: Send {
    /// Open the device and start delivering frames.
    fn open(
        &mut self,
        request: &CaptureRequest,
        on_frame: FrameCallback,
        on_error: ErrorCallback,
    ) -> Result<(), LiveError>;

    /// Stop capture and release the device. Safe to call repeatedly.
    fn close(&mut self);

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Source of per-session audio resources
///
/// The controller asks for a fresh capture backend and a fresh output for
/// every session so no two sessions ever share a handle.
pub trait AudioDevices: Send + Sync {
    /// Enumerate input devices. The first call may trigger a permission prompt.
    fn list_input_devices(&self) -> Result<Vec<InputDeviceInfo>, LiveError>;

    /// Create an unopened capture backend.
    fn capture_backend(&self) -> Box<dyn CaptureBackend>;

    /// Open an output context ready for scheduling.
    fn open_output(&self) -> Result<Box<dyn AudioOutput>, LiveError>;
}

/// Most recent input RMS level, shared between the capture thread and readers
#[derive(Debug, Clone, Default)]
pub struct LevelMeter {
    bits: Arc<AtomicU32>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}
