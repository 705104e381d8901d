use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::backend::{CaptureBackend, CaptureRequest, ErrorCallback, FrameCallback};
use super::pcm;
use super::resample::resample_buffer;
use crate::error::LiveError;

/// A WAV file decoded to float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`.
    pub fn to_mono(&self, target_rate: u32) -> Result<Vec<f32>, LiveError> {
        let mono = pcm::downmix_to_mono(&self.samples, self.channels.max(1) as usize);
        resample_buffer(&mono, self.sample_rate, target_rate)
    }
}

/// Replays a WAV file as if it were a microphone
///
/// Frames are delivered from a background thread at real-time pace. When
/// the file runs out the backend either loops or goes silent.
pub struct FileBackend {
    path: PathBuf,
    frame_size: usize,
    looping: bool,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame_size: 1024,
            looping: false,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Samples per delivered frame (default: 1024)
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(1);
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

impl CaptureBackend for FileBackend {
    fn open(
        &mut self,
        request: &CaptureRequest,
        mut on_frame: FrameCallback,
        _on_error: ErrorCallback,
    ) -> Result<(), LiveError> {
        self.close();

        if !self.path.exists() {
            return Err(LiveError::DeviceUnavailable(format!(
                "audio file {} not found",
                self.path.display()
            )));
        }

        let file = AudioFile::open(&self.path).map_err(|e| LiveError::Device(format!("{:#}", e)))?;
        let samples = file.to_mono(request.sample_rate)?;
        if samples.is_empty() {
            return Err(LiveError::Device(format!(
                "audio file {} has no samples",
                self.path.display()
            )));
        }

        let frame_size = self.frame_size;
        let looping = self.looping;
        let frame_duration =
            Duration::from_secs_f64(frame_size as f64 / request.sample_rate.max(1) as f64);
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("lingo-file-capture".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut delivered: u32 = 0;
                let mut position = 0;

                while !stop.load(Ordering::SeqCst) {
                    if position >= samples.len() {
                        if !looping {
                            break;
                        }
                        position = 0;
                    }

                    let end = (position + frame_size).min(samples.len());
                    on_frame(&samples[position..end]);
                    position = end;
                    delivered += 1;

                    // Pace against the start time so sleep error does not accumulate
                    let due = started + frame_duration * delivered;
                    let now = Instant::now();
                    if due > now {
                        std::thread::sleep(due - now);
                    }
                }
            })
            .map_err(|e| LiveError::Device(format!("failed to spawn file capture thread: {}", e)))?;

        info!(
            "Replaying {} as microphone ({}Hz, {} sample frames)",
            self.path.display(),
            request.sample_rate,
            frame_size
        );

        self.thread = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("File capture thread panicked");
            }
            info!("File capture stopped: {}", self.path.display());
        }
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        self.close();
    }
}
