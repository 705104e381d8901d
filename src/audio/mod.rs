pub mod backend;
pub mod capture;
pub mod chunk;
pub mod file;
pub mod host;
pub mod output;
pub mod pcm;
pub mod playback;
pub mod resample;

pub use backend::{
    AudioDevices, CaptureBackend, CaptureRequest, DeviceSelector, ErrorCallback, FrameCallback,
    InputDeviceInfo, LevelMeter,
};
pub use capture::{AudioCaptureEngine, CaptureConfig, CaptureEvent, CaptureStats};
pub use chunk::{AudioChunk, ChunkAccumulator, ChunkConfig};
pub use file::{AudioFile, FileBackend};
pub use host::{CpalBackend, CpalDevices, CpalOutput};
pub use output::{AudioOutput, ScheduledBuffer, VirtualOutput};
pub use playback::{PlaybackScheduler, ScheduledPlayback};
