// In-memory stand-ins for the microphone, speaker and live service.
#![allow(dead_code)]

use async_trait::async_trait;
use lingo_voice::audio::{
    AudioDevices, AudioOutput, CaptureBackend, CaptureRequest, ErrorCallback, FrameCallback,
    InputDeviceInfo, VirtualOutput,
};
use lingo_voice::live::{Connector, Frame, Transport};
use lingo_voice::LiveError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const TEST_ENDPOINT: &str = "ws://live.test/session";

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ============================================================================
// Capture
// ============================================================================

/// Shared view of every `ScriptedCapture` a `FakeDevices` hands out
#[derive(Default)]
pub struct CaptureHandle {
    on_frame: Mutex<Option<FrameCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
    fail_open: Mutex<Option<LiveError>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub open_now: AtomicUsize,
    pub last_request: Mutex<Option<CaptureRequest>>,
}

impl CaptureHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a frame as the audio thread would. Returns false if no
    /// device is open.
    pub fn push(&self, frame: &[f32]) -> bool {
        match self.on_frame.lock().as_mut() {
            Some(callback) => {
                callback(frame);
                true
            }
            None => false,
        }
    }

    /// Report a device failure after open.
    pub fn fail(&self, error: LiveError) -> bool {
        match self.on_error.lock().as_mut() {
            Some(callback) => {
                callback(error);
                true
            }
            None => false,
        }
    }

    /// Make the next open fail with `error`.
    pub fn fail_next_open(&self, error: LiveError) {
        *self.fail_open.lock() = Some(error);
    }

    pub fn open_count(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }
}

pub struct ScriptedCapture {
    handle: Arc<CaptureHandle>,
    open: bool,
}

impl ScriptedCapture {
    pub fn new(handle: Arc<CaptureHandle>) -> Self {
        Self { handle, open: false }
    }
}

impl CaptureBackend for ScriptedCapture {
    fn open(
        &mut self,
        request: &CaptureRequest,
        on_frame: FrameCallback,
        on_error: ErrorCallback,
    ) -> Result<(), LiveError> {
        if let Some(error) = self.handle.fail_open.lock().take() {
            return Err(error);
        }

        *self.handle.on_frame.lock() = Some(on_frame);
        *self.handle.on_error.lock() = Some(on_error);
        *self.handle.last_request.lock() = Some(request.clone());
        self.handle.opens.fetch_add(1, Ordering::SeqCst);
        self.handle.open_now.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.handle.closes.fetch_add(1, Ordering::SeqCst);
        if !self.open {
            return;
        }
        self.open = false;
        *self.handle.on_frame.lock() = None;
        *self.handle.on_error.lock() = None;
        self.handle.open_now.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Devices
// ============================================================================

pub struct FakeDevices {
    pub capture: Arc<CaptureHandle>,
    outputs: Mutex<Vec<VirtualOutput>>,
    output_error: Mutex<Option<LiveError>>,
    list_error: Mutex<Option<LiveError>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            capture: CaptureHandle::new(),
            outputs: Mutex::new(Vec::new()),
            output_error: Mutex::new(None),
            list_error: Mutex::new(None),
        })
    }

    /// Every output opened so far, oldest first
    pub fn outputs(&self) -> Vec<VirtualOutput> {
        self.outputs.lock().clone()
    }

    pub fn last_output(&self) -> Option<VirtualOutput> {
        self.outputs.lock().last().cloned()
    }

    pub fn open_outputs(&self) -> usize {
        self.outputs.lock().iter().filter(|o| !o.is_closed()).count()
    }

    pub fn fail_next_output(&self, error: LiveError) {
        *self.output_error.lock() = Some(error);
    }

    pub fn fail_listing(&self, error: LiveError) {
        *self.list_error.lock() = Some(error);
    }
}

impl AudioDevices for FakeDevices {
    fn list_input_devices(&self) -> Result<Vec<InputDeviceInfo>, LiveError> {
        if let Some(error) = self.list_error.lock().clone() {
            return Err(error);
        }
        Ok(vec![
            InputDeviceInfo {
                id: "built-in".to_string(),
                label: "Built-in Microphone".to_string(),
                is_default: true,
            },
            InputDeviceInfo {
                id: "usb-headset".to_string(),
                label: "USB Headset".to_string(),
                is_default: false,
            },
        ])
    }

    fn capture_backend(&self) -> Box<dyn CaptureBackend> {
        Box::new(ScriptedCapture::new(Arc::clone(&self.capture)))
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, LiveError> {
        if let Some(error) = self.output_error.lock().take() {
            return Err(error);
        }
        let output = VirtualOutput::manual();
        self.outputs.lock().push(output.clone());
        Ok(Box::new(output))
    }
}

// ============================================================================
// Transport
// ============================================================================

enum Inbound {
    Frame(Frame),
    Fail(LiveError),
}

/// The service side of one fake connection
#[derive(Clone)]
pub struct RemoteEnd {
    sent: Arc<Mutex<Vec<Frame>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    closed: Arc<Mutex<bool>>,
}

impl RemoteEnd {
    /// Frames the client has sent, in order
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Sent frames parsed as JSON
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => serde_json::from_str(&text).ok(),
                Frame::Binary(bytes) => serde_json::from_slice(&bytes).ok(),
            })
            .collect()
    }

    pub fn push_text(&self, text: &str) {
        let _ = self.inbound.send(Inbound::Frame(Frame::Text(text.to_string())));
    }

    pub fn push_binary(&self, bytes: &[u8]) {
        let _ = self.inbound.send(Inbound::Frame(Frame::Binary(bytes.to_vec())));
    }

    /// Make the client's next read fail with `error`.
    pub fn fail(&self, error: LiveError) {
        let _ = self.inbound.send(Inbound::Fail(error));
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

pub struct FakeTransport {
    sent: Arc<Mutex<Vec<Frame>>>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    closed: Arc<Mutex<bool>>,
    /// Every send after the first never completes
    stall_sends: bool,
    /// Close never completes
    stall_close: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), LiveError> {
        if *self.closed.lock() {
            return Err(LiveError::Transport("send after close".to_string()));
        }
        if self.stall_sends && !self.sent.lock().is_empty() {
            // A peer that stopped reading: the socket buffer never drains
            std::future::pending::<()>().await;
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>, LiveError> {
        match self.inbound.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Fail(error)) => Err(error),
            // Remote end dropped by the test: stay open until closed locally
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        if self.stall_close {
            std::future::pending::<()>().await;
        }
        *self.closed.lock() = true;
    }
}

#[derive(Default)]
pub struct FakeConnector {
    remotes: Mutex<Vec<RemoteEnd>>,
    endpoints: Mutex<Vec<String>>,
    fail_connect: Mutex<Option<LiveError>>,
    /// Hold connects until released
    gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
    stall_sends: Mutex<bool>,
    stall_close: Mutex<bool>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_connect(&self, error: LiveError) {
        *self.fail_connect.lock() = Some(error);
    }

    /// Make connects wait until the returned notify is triggered.
    pub fn hold_connects(&self) -> Arc<tokio::sync::Notify> {
        let notify = Arc::new(tokio::sync::Notify::new());
        *self.gate.lock() = Some(Arc::clone(&notify));
        notify
    }

    /// Connections made from now on accept `setup`, then block on every send.
    pub fn stall_sends_after_setup(&self) {
        *self.stall_sends.lock() = true;
    }

    /// Connections made from now on never finish closing.
    pub fn stall_closes(&self) {
        *self.stall_close.lock() = true;
    }

    pub fn remotes(&self) -> Vec<RemoteEnd> {
        self.remotes.lock().clone()
    }

    pub fn last_remote(&self) -> Option<RemoteEnd> {
        self.remotes.lock().last().cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.remotes.lock().len()
    }

    pub fn open_connections(&self) -> usize {
        self.remotes.lock().iter().filter(|r| !r.is_closed()).count()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, LiveError> {
        self.endpoints.lock().push(endpoint.to_string());

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.fail_connect.lock().take() {
            return Err(error);
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(false));

        self.remotes.lock().push(RemoteEnd {
            sent: Arc::clone(&sent),
            inbound: inbound_tx,
            closed: Arc::clone(&closed),
        });

        Ok(Box::new(FakeTransport {
            sent,
            inbound: inbound_rx,
            closed,
            stall_sends: *self.stall_sends.lock(),
            stall_close: *self.stall_close.lock(),
        }))
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// PCM16 LE bytes of `samples` copies of a constant value
pub fn pcm_bytes(samples: usize, value: i16) -> Vec<u8> {
    std::iter::repeat(value.to_le_bytes())
        .take(samples)
        .flatten()
        .collect()
}

/// A `serverContent` frame carrying one audio part
pub fn server_audio_json(samples: usize, rate: u32) -> String {
    use base64::Engine;
    let data = base64::engine::general_purpose::STANDARD.encode(pcm_bytes(samples, 1000));
    serde_json::json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{"inlineData": {"mimeType": format!("audio/pcm;rate={}", rate), "data": data}}]
            }
        }
    })
    .to_string()
}

pub fn server_text_json(text: &str) -> String {
    serde_json::json!({
        "serverContent": {"modelTurn": {"parts": [{"text": text}]}}
    })
    .to_string()
}
