//! cpal-backed microphone capture and speaker output.
//!
//! cpal streams are not `Send` on every platform, so each stream is built,
//! played and dropped on its own thread. The owning handle only keeps a stop
//! channel and the join handle.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{
    AudioDevices, CaptureBackend, CaptureRequest, DeviceSelector, ErrorCallback, FrameCallback,
    InputDeviceInfo,
};
use super::output::AudioOutput;
use super::resample::{resample_buffer, StreamResampler};
use crate::error::LiveError;

// MARK: - Error mapping

fn classify_backend_error(description: String) -> LiveError {
    let lower = description.to_lowercase();
    if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("not authorized")
        || lower.contains("unauthorized")
    {
        LiveError::PermissionDenied(description)
    } else {
        LiveError::Device(description)
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> LiveError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            LiveError::DeviceUnavailable("device is no longer available".to_string())
        }
        other => classify_backend_error(other.to_string()),
    }
}

fn map_config_error(err: cpal::DefaultStreamConfigError) -> LiveError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            LiveError::DeviceUnavailable("device is no longer available".to_string())
        }
        other => classify_backend_error(other.to_string()),
    }
}

fn map_play_error(err: cpal::PlayStreamError) -> LiveError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => {
            LiveError::DeviceUnavailable("device is no longer available".to_string())
        }
        other => classify_backend_error(other.to_string()),
    }
}

fn map_stream_error(err: cpal::StreamError) -> LiveError {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            LiveError::Device("device disconnected".to_string())
        }
        other => LiveError::Device(other.to_string()),
    }
}

// MARK: - Stream thread

/// Owns a cpal stream living on a dedicated thread
struct StreamThread {
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Run `build` on a new thread and keep its stream alive until `stop`.
    fn spawn<F, R>(name: &str, build: F) -> Result<(Self, R), LiveError>
    where
        F: FnOnce() -> Result<(cpal::Stream, R), LiveError> + Send + 'static,
        R: Send + 'static,
    {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok((stream, info)) => {
                    let _ = ready_tx.send(Ok(info));
                    // Returns on stop() or when the owner is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| LiveError::Device(format!("failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(info)) => Ok((
                Self {
                    stop_tx: Some(stop_tx),
                    handle: Some(handle),
                },
                info,
            )),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(LiveError::Device(
                    "audio thread exited during startup".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Audio thread panicked while stopping");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

// MARK: - Capture

fn find_input_device(
    host: &cpal::Host,
    selector: &DeviceSelector,
) -> Result<cpal::Device, LiveError> {
    match selector {
        DeviceSelector::Default => host
            .default_input_device()
            .ok_or_else(|| LiveError::DeviceUnavailable("no default input device".to_string())),
        DeviceSelector::Id(id) => host
            .input_devices()
            .map_err(|e| classify_backend_error(e.to_string()))?
            .find(|d| d.name().map(|n| &n == id).unwrap_or(false))
            .ok_or_else(|| LiveError::DeviceUnavailable(format!("input device '{}' not found", id))),
    }
}

/// Downmixes and resamples raw device frames before the engine sees them
struct InputProcessor {
    channels: usize,
    resampler: StreamResampler,
    mono: Vec<f32>,
    resampled: Vec<f32>,
    on_frame: FrameCallback,
}

impl InputProcessor {
    fn process<T>(&mut self, data: &[T])
    where
        T: Sample,
        f32: FromSample<T>,
    {
        self.mono.clear();
        for frame in data.chunks(self.channels) {
            let sum: f32 = frame.iter().map(|&s| <f32 as Sample>::from_sample(s)).sum();
            self.mono.push(sum / frame.len() as f32);
        }

        self.resampled.clear();
        if let Err(e) = self.resampler.process(&self.mono, &mut self.resampled) {
            error!("Input resampling failed: {}", e);
            return;
        }
        if !self.resampled.is_empty() {
            (self.on_frame)(&self.resampled);
        }
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut processor: InputProcessor,
    mut on_error: ErrorCallback,
) -> Result<cpal::Stream, LiveError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| processor.process(data),
            move |err| on_error(map_stream_error(err)),
            None,
        )
        .map_err(map_build_error)
}

fn open_input_stream(
    request: CaptureRequest,
    on_frame: FrameCallback,
    on_error: ErrorCallback,
) -> Result<(cpal::Stream, String), LiveError> {
    let host = cpal::default_host();
    let device = find_input_device(&host, &request.device)?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = device.default_input_config().map_err(map_config_error)?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels().max(1) as usize;
    let config: cpal::StreamConfig = supported.config();

    info!(
        "Opening input '{}' ({}Hz, {} channels, {:?}) -> {}Hz mono",
        device_name,
        device_rate,
        channels,
        supported.sample_format(),
        request.sample_rate
    );

    let processor = InputProcessor {
        channels,
        resampler: StreamResampler::new(device_rate, request.sample_rate)?,
        mono: Vec::with_capacity(4096),
        resampled: Vec::with_capacity(4096),
        on_frame,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, processor, on_error)?,
        SampleFormat::I16 => build_input::<i16>(&device, &config, processor, on_error)?,
        SampleFormat::U16 => build_input::<u16>(&device, &config, processor, on_error)?,
        SampleFormat::I32 => build_input::<i32>(&device, &config, processor, on_error)?,
        other => {
            return Err(LiveError::Device(format!(
                "unsupported input sample format {:?}",
                other
            )))
        }
    };

    stream.play().map_err(map_play_error)?;
    Ok((stream, device_name))
}

/// Microphone capture through the default cpal host
pub struct CpalBackend {
    thread: Option<StreamThread>,
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            thread: None,
            device_name: None,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for CpalBackend {
    fn open(
        &mut self,
        request: &CaptureRequest,
        on_frame: FrameCallback,
        on_error: ErrorCallback,
    ) -> Result<(), LiveError> {
        self.close();

        if request.echo_cancellation || request.noise_suppression || request.auto_gain_control {
            debug!(
                "Echo cancellation/noise suppression/AGC requested; cpal exposes none of them, \
                 capturing raw input"
            );
        }

        let request = request.clone();
        let (thread, device_name) = StreamThread::spawn("lingo-capture", move || {
            open_input_stream(request, on_frame, on_error)
        })?;

        self.thread = Some(thread);
        self.device_name = Some(device_name);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            info!(
                "Released input device '{}'",
                self.device_name.take().unwrap_or_default()
            );
        }
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

// MARK: - Output

struct QueuedBuffer {
    start_frame: u64,
    /// End on the scheduler's clock, in seconds
    end_at: f64,
    samples: Vec<f32>,
}

impl QueuedBuffer {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

fn to_frame(secs: f64, rate: u32) -> u64 {
    (secs * rate as f64).round().max(0.0) as u64
}

/// Buffers queued on the output, ordered by start frame
struct Timeline {
    buffers: VecDeque<QueuedBuffer>,
    /// Where the last queued buffer ends, in seconds and in frames
    tail: Option<(f64, u64)>,
}

impl Timeline {
    fn new() -> Self {
        Self {
            buffers: VecDeque::new(),
            tail: None,
        }
    }

    /// Queue samples at `rate` that cover `[start_at, end_at)`.
    ///
    /// A buffer that starts where the previous one ended continues from its
    /// end frame, and every buffer is cut or padded to its rounded end, so
    /// back-to-back audio tiles the frame grid with no gap or overlap.
    fn insert(&mut self, rate: u32, start_at: f64, end_at: f64, mut samples: Vec<f32>) {
        let rate = rate.max(1);
        let half_frame = 0.5 / rate as f64;
        let start_frame = match self.tail {
            Some((tail_at, tail_frame)) if (start_at - tail_at).abs() < half_frame => tail_frame,
            _ => to_frame(start_at, rate),
        };
        let end_frame = to_frame(end_at, rate).max(start_frame);

        let hold = samples.last().copied().unwrap_or(0.0);
        samples.resize((end_frame - start_frame) as usize, hold);

        if self.tail.map_or(true, |(_, tail_frame)| end_frame >= tail_frame) {
            self.tail = Some((end_at, end_frame));
        }

        let position = self.buffers.partition_point(|b| b.start_frame <= start_frame);
        self.buffers.insert(
            position,
            QueuedBuffer {
                start_frame,
                end_at,
                samples,
            },
        );
    }

    /// Drop buffers that start after `cursor`. Returns how many were dropped.
    fn discard_after(&mut self, cursor: u64) -> usize {
        let before = self.buffers.len();
        self.buffers.retain(|b| b.start_frame <= cursor);
        self.tail = self.buffers.back().map(|b| (b.end_at, b.end_frame()));
        before - self.buffers.len()
    }

    fn clear(&mut self) {
        self.buffers.clear();
        self.tail = None;
    }

    /// Mono sample at `cursor`, silence where nothing is queued. Drops
    /// buffers that have finished.
    fn sample_at(&mut self, cursor: u64) -> f32 {
        while let Some(front) = self.buffers.front() {
            if front.end_frame() <= cursor {
                self.buffers.pop_front();
            } else {
                break;
            }
        }

        match self.buffers.front() {
            Some(buffer) if buffer.start_frame <= cursor => {
                buffer.samples[(cursor - buffer.start_frame) as usize]
            }
            _ => 0.0,
        }
    }
}

/// State shared between the output handle and the device callback
struct OutputShared {
    frames_rendered: AtomicU64,
    timeline: Mutex<Timeline>,
}

impl OutputShared {
    /// Fill one device buffer from the timeline.
    fn render<T>(&self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        let mut timeline = self.timeline.lock();
        let mut cursor = self.frames_rendered.load(Ordering::Acquire);

        for frame in data.chunks_mut(channels) {
            let sample = <T as Sample>::from_sample(timeline.sample_at(cursor));
            for out in frame.iter_mut() {
                *out = sample;
            }
            cursor += 1;
        }

        self.frames_rendered.store(cursor, Ordering::Release);
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<OutputShared>,
) -> Result<cpal::Stream, LiveError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| shared.render(data, channels),
            |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(map_build_error)
}

fn open_output_stream(shared: Arc<OutputShared>) -> Result<(cpal::Stream, u32), LiveError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| LiveError::DeviceUnavailable("no default output device".to_string()))?;
    let supported = device.default_output_config().map_err(map_config_error)?;
    let device_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.config();

    info!(
        "Opening output '{}' ({}Hz, {} channels)",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        device_rate,
        config.channels
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, shared)?,
        SampleFormat::I16 => build_output::<i16>(&device, &config, shared)?,
        SampleFormat::U16 => build_output::<u16>(&device, &config, shared)?,
        SampleFormat::I32 => build_output::<i32>(&device, &config, shared)?,
        other => {
            return Err(LiveError::Device(format!(
                "unsupported output sample format {:?}",
                other
            )))
        }
    };

    stream.play().map_err(map_play_error)?;
    Ok((stream, device_rate))
}

/// Speaker output with a clock counted in rendered frames
pub struct CpalOutput {
    shared: Arc<OutputShared>,
    device_rate: u32,
    thread: Option<StreamThread>,
}

impl CpalOutput {
    pub fn open() -> Result<Self, LiveError> {
        let shared = Arc::new(OutputShared {
            frames_rendered: AtomicU64::new(0),
            timeline: Mutex::new(Timeline::new()),
        });

        let stream_shared = Arc::clone(&shared);
        let (thread, device_rate) = StreamThread::spawn("lingo-playback", move || {
            open_output_stream(stream_shared)
        })?;

        Ok(Self {
            shared,
            device_rate,
            thread: Some(thread),
        })
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.shared.frames_rendered.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn play_at(&mut self, start_at: f64, samples: Vec<f32>, sample_rate: u32) {
        if self.thread.is_none() || samples.is_empty() || sample_rate == 0 {
            return;
        }

        let end_at = start_at + samples.len() as f64 / sample_rate as f64;
        let samples = match resample_buffer(&samples, sample_rate, self.device_rate) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Dropping playback buffer: {}", e);
                return;
            }
        };

        self.shared
            .timeline
            .lock()
            .insert(self.device_rate, start_at, end_at, samples);
    }

    fn discard_pending(&mut self) {
        let cursor = self.shared.frames_rendered.load(Ordering::Acquire);
        let discarded = self.shared.timeline.lock().discard_after(cursor);
        if discarded > 0 {
            debug!("Discarded {} pending playback buffers", discarded);
        }
    }

    fn close(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            self.shared.timeline.lock().clear();
            info!("Released output device");
        }
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// MARK: - Device source

/// Per-session microphone and speaker handles from the default cpal host
pub struct CpalDevices {
    permission_granted: AtomicBool,
}

impl CpalDevices {
    pub fn new() -> Self {
        Self {
            permission_granted: AtomicBool::new(false),
        }
    }

    /// Touch the default input once; on hosts with a permission model this is
    /// what raises the prompt.
    fn ensure_permission(&self, host: &cpal::Host) -> Result<(), LiveError> {
        if self.permission_granted.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(device) = host.default_input_device() {
            device.default_input_config().map_err(map_config_error)?;
        }

        self.permission_granted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for CpalDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevices for CpalDevices {
    fn list_input_devices(&self) -> Result<Vec<InputDeviceInfo>, LiveError> {
        let host = cpal::default_host();
        self.ensure_permission(&host)?;

        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let devices = host
            .input_devices()
            .map_err(|e| classify_backend_error(e.to_string()))?;

        let mut listed = Vec::new();
        for device in devices {
            match device.name() {
                Ok(name) => listed.push(InputDeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    id: name.clone(),
                    label: name,
                }),
                Err(e) => warn!("Skipping input device without a name: {}", e),
            }
        }

        Ok(listed)
    }

    fn capture_backend(&self) -> Box<dyn CaptureBackend> {
        Box::new(CpalBackend::new())
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, LiveError> {
        Ok(Box::new(CpalOutput::open()?))
    }
}
