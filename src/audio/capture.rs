use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use super::backend::{CaptureBackend, CaptureRequest, DeviceSelector, FrameCallback};
use super::chunk::{AudioChunk, ChunkAccumulator, ChunkConfig};
use crate::error::LiveError;

/// Capture engine configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate chunks are produced at (default: 16kHz)
    pub sample_rate: u32,
    /// Samples per emitted chunk
    pub chunk_threshold_samples: usize,
    /// Chunks buffered between the audio thread and the session task
    pub queue_depth: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_threshold_samples: 4096,
            queue_depth: 32,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Output of an open capture engine
#[derive(Debug)]
pub enum CaptureEvent {
    /// A full chunk ready to send
    Chunk(AudioChunk),
    /// The device failed; no further chunks will arrive
    Failed(LiveError),
}

/// Capture counters, readable while the audio thread runs
#[derive(Debug, Default)]
pub struct CaptureStats {
    chunks_emitted: AtomicU64,
    chunks_dropped: AtomicU64,
}

impl CaptureStats {
    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted.load(Ordering::Relaxed)
    }

    pub fn chunks_dropped(&self) -> u64 {
        self.chunks_dropped.load(Ordering::Relaxed)
    }
}

/// Turns a capture backend into a stream of fixed-size PCM16 chunks
///
/// The chunker runs inside the backend's frame callback: it only appends,
/// converts and hands chunks off with `try_send`.
pub struct AudioCaptureEngine {
    backend: Box<dyn CaptureBackend>,
    config: CaptureConfig,
    /// Shared with the frame callback so taps outlive close/open cycles
    taps: Arc<Mutex<Vec<FrameCallback>>>,
    stats: Arc<CaptureStats>,
    open: bool,
}

impl AudioCaptureEngine {
    pub fn new(backend: Box<dyn CaptureBackend>, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            taps: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(CaptureStats::default()),
            open: false,
        }
    }

    /// Register a callback invoked with every raw frame.
    ///
    /// Runs on the audio thread; must not block. Stays registered across
    /// `close` and `open`.
    pub fn on_samples<F>(&mut self, callback: F)
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        self.taps.lock().push(Box::new(callback));
    }

    /// Open the device and start producing chunks.
    pub fn open(
        &mut self,
        device: &DeviceSelector,
    ) -> Result<mpsc::Receiver<CaptureEvent>, LiveError> {
        if self.open {
            self.close();
        }

        let request = CaptureRequest {
            device: device.clone(),
            sample_rate: self.config.sample_rate,
            echo_cancellation: self.config.echo_cancellation,
            noise_suppression: self.config.noise_suppression,
            auto_gain_control: self.config.auto_gain_control,
        };

        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));

        let mut accumulator = ChunkAccumulator::new(ChunkConfig::new(
            self.config.chunk_threshold_samples,
            self.config.sample_rate,
        ));
        let taps = Arc::clone(&self.taps);
        let frame_tx = tx.clone();
        let stats = Arc::clone(&self.stats);

        let on_frame: FrameCallback = Box::new(move |frame: &[f32]| {
            for tap in taps.lock().iter_mut() {
                tap(frame);
            }
            accumulator.push(frame, |chunk| {
                match frame_tx.try_send(CaptureEvent::Chunk(chunk)) {
                    Ok(()) => {
                        stats.chunks_emitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Closed(_)) => {}
                }
            });
        });

        let on_error = Box::new(move |err: LiveError| {
            let _ = tx.try_send(CaptureEvent::Failed(err));
        });

        self.backend.open(&request, on_frame, on_error)?;
        self.open = true;

        info!(
            "Capture started on {} ({}Hz mono, {} sample chunks)",
            self.backend.name(),
            self.config.sample_rate,
            self.config.chunk_threshold_samples
        );

        Ok(rx)
    }

    /// Stop capture and release the device. Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            // The backend may hold a half-opened device after a failed open
            self.backend.close();
            return;
        }

        self.backend.close();
        self.open = false;

        let dropped = self.stats.chunks_dropped();
        if dropped > 0 {
            warn!("Capture dropped {} chunks (session task fell behind)", dropped);
        }
        info!("Capture stopped on {}", self.backend.name());
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for AudioCaptureEngine {
    fn drop(&mut self) {
        self.close();
    }
}
