use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::config::{ControllerSettings, SessionConfig};
use super::stats::{
    SessionStats, SessionStatus, TranscriptEvent, TranscriptSegment, TranscriptSink,
};
use crate::audio::{
    pcm, AudioCaptureEngine, AudioDevices, CaptureEvent, CaptureStats, InputDeviceInfo,
    LevelMeter, PlaybackScheduler,
};
use crate::error::LiveError;
use crate::live::{ConnectionEvent, ConnectionSession, ConnectionStats, Connector, ProtocolMessage};

/// How often the speaking flag is refreshed from the playback clock
const SPEAKING_POLL: Duration = Duration::from_millis(50);

/// Single entry point for live voice sessions
///
/// Owns at most one session at a time. Each session's resources (capture
/// device, connection, playback output) live in one task that tears them
/// down when it ends, whether through `disconnect()`, a transport error,
/// a remote close or a device failure.
pub struct SessionController {
    devices: Arc<dyn AudioDevices>,
    connector: Arc<dyn Connector>,
    settings: ControllerSettings,
    shared: Arc<Shared>,
    /// Also serializes connect/disconnect
    active: tokio::sync::Mutex<Option<ActiveSession>>,
}

/// State readable while a session task runs
struct Shared {
    status: watch::Sender<SessionStatus>,
    speaking: watch::Sender<bool>,
    transcript: Mutex<Vec<TranscriptSegment>>,
    level: LevelMeter,
    chunks_received: AtomicU64,
    info: Mutex<Option<SessionInfo>>,
}

struct SessionInfo {
    id: String,
    started_at: DateTime<Utc>,
    capture: Arc<CaptureStats>,
    connection: Arc<ConnectionStats>,
}

struct ActiveSession {
    id: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<SessionOutcome>,
}

impl ActiveSession {
    /// Signal the session task and wait for its teardown to finish.
    async fn stop(mut self) -> SessionOutcome {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session_id = %self.id, "Session task panicked: {}", e);
                SessionOutcome::Failed(LiveError::Device(format!("session task panicked: {}", e)))
            }
        }
    }
}

#[derive(Debug)]
enum SessionOutcome {
    Disconnected,
    Failed(LiveError),
}

/// Everything one live conversation owns
struct Session {
    id: String,
    capture: AudioCaptureEngine,
    capture_events: mpsc::Receiver<CaptureEvent>,
    connection: ConnectionSession,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    scheduler: PlaybackScheduler,
    sink: Option<TranscriptSink>,
    turn: u32,
}

impl SessionController {
    pub fn new(
        devices: Arc<dyn AudioDevices>,
        connector: Arc<dyn Connector>,
        settings: ControllerSettings,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);
        let (speaking, _) = watch::channel(false);

        Self {
            devices,
            connector,
            settings,
            shared: Arc::new(Shared {
                status,
                speaking,
                transcript: Mutex::new(Vec::new()),
                level: LevelMeter::new(),
                chunks_received: AtomicU64::new(0),
                info: Mutex::new(None),
            }),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Start a live session, replacing any existing one.
    ///
    /// Device errors are returned here and leave the status at `Error`.
    /// Connection errors arrive later through the status.
    pub async fn connect(
        &self,
        config: SessionConfig,
        transcript: Option<TranscriptSink>,
    ) -> Result<String, LiveError> {
        self.settings.validate()?;

        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            info!(session_id = %previous.id, "Tearing down previous session before connecting");
            previous.stop().await;
        }

        let id = uuid::Uuid::new_v4().to_string();
        info!(session_id = %id, model = %config.model, "Connecting live session");

        self.shared.status.send_replace(SessionStatus::Connecting);
        self.shared.speaking.send_replace(false);
        self.shared.transcript.lock().clear();
        self.shared.level.set(0.0);
        self.shared.chunks_received.store(0, Ordering::Relaxed);
        *self.shared.info.lock() = None;

        let output = match self.devices.open_output() {
            Ok(output) => output,
            Err(e) => return Err(self.fail_connect(&id, e)),
        };
        let mut scheduler = PlaybackScheduler::new(output);
        scheduler.reset();

        let mut capture =
            AudioCaptureEngine::new(self.devices.capture_backend(), self.settings.capture.clone());
        let level = self.shared.level.clone();
        capture.on_samples(move |frame| level.set(pcm::rms(frame)));

        let capture_events = match capture.open(&config.device()) {
            Ok(events) => events,
            Err(e) => {
                capture.close();
                scheduler.close_output();
                return Err(self.fail_connect(&id, e));
            }
        };

        let (connection, connection_events) = ConnectionSession::open(
            Arc::clone(&self.connector),
            self.settings.connection_config(&config),
        );

        *self.shared.info.lock() = Some(SessionInfo {
            id: id.clone(),
            started_at: Utc::now(),
            capture: capture.stats(),
            connection: connection.stats(),
        });

        let session = Session {
            id: id.clone(),
            capture,
            capture_events,
            connection,
            connection_events,
            scheduler,
            sink: transcript,
            turn: 0,
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(session, shutdown_rx, Arc::clone(&self.shared)));

        *active = Some(ActiveSession {
            id: id.clone(),
            shutdown: Some(shutdown_tx),
            task,
        });

        Ok(id)
    }

    /// Tear down the current session and return to `Idle`.
    ///
    /// Safe to call in any state. With no session it only clears an `Error`
    /// left by a failed connect.
    pub async fn disconnect(&self) -> SessionStats {
        let mut active = self.active.lock().await;

        let Some(session) = active.take() else {
            debug!("Disconnect requested with no session");
            // A connect that failed on its devices left no session behind
            if self.status() == SessionStatus::Error {
                self.shared.status.send_replace(SessionStatus::Idle);
            }
            return self.stats();
        };

        let id = session.id.clone();
        info!(session_id = %id, "Disconnecting live session");

        if let SessionOutcome::Failed(e) = session.stop().await {
            debug!(session_id = %id, "Session had already failed: {}", e);
        }

        self.shared.status.send_replace(SessionStatus::Idle);
        let stats = self.stats();
        *self.shared.info.lock() = None;

        info!(
            session_id = %id,
            "Session disconnected ({} chunks sent, {} received)",
            stats.chunks_sent, stats.chunks_received
        );

        stats
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// Resolve once the status is `Error`, immediately if it already is.
    pub async fn wait_for_failure(&self) {
        let mut status = self.shared.status.subscribe();
        let _ = status.wait_for(|s| *s == SessionStatus::Error).await;
    }

    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.shared.speaking.subscribe()
    }

    /// Whether model audio is playing, refreshed every 50ms
    pub fn is_speaking(&self) -> bool {
        *self.shared.speaking.borrow()
    }

    /// Latest input RMS level
    pub fn input_level(&self) -> f32 {
        self.shared.level.get()
    }

    pub fn transcript(&self) -> Vec<TranscriptSegment> {
        self.shared.transcript.lock().clone()
    }

    pub fn list_input_devices(&self) -> Result<Vec<InputDeviceInfo>, LiveError> {
        self.devices.list_input_devices()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn stats(&self) -> SessionStats {
        let status = self.status();
        let transcript_segments_count = self.shared.transcript.lock().len();
        let info = self.shared.info.lock();

        let (session_id, started_at, duration_secs, chunks_sent, chunks_dropped) = match info.as_ref()
        {
            Some(info) => {
                let duration = Utc::now().signed_duration_since(info.started_at);
                (
                    Some(info.id.clone()),
                    Some(info.started_at),
                    duration.num_milliseconds() as f64 / 1000.0,
                    info.connection.chunks_sent(),
                    info.connection.chunks_dropped() + info.capture.chunks_dropped(),
                )
            }
            None => (None, None, 0.0, 0, 0),
        };

        SessionStats {
            status,
            session_id,
            started_at,
            duration_secs,
            chunks_sent,
            chunks_dropped,
            chunks_received: self.shared.chunks_received.load(Ordering::Relaxed),
            transcript_segments_count,
            is_speaking: self.is_speaking(),
            input_level: self.input_level(),
        }
    }

    fn fail_connect(&self, id: &str, error: LiveError) -> LiveError {
        error!(session_id = %id, "Failed to open audio devices: {}", error);
        self.shared.status.send_replace(SessionStatus::Error);
        error
    }
}

async fn run_session(
    mut session: Session,
    mut shutdown: oneshot::Receiver<()>,
    shared: Arc<Shared>,
) -> SessionOutcome {
    let mut ticker = tokio::time::interval(SPEAKING_POLL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut capture_live = true;

    let outcome = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break SessionOutcome::Disconnected,
            event = session.capture_events.recv(), if capture_live => match event {
                Some(CaptureEvent::Chunk(chunk)) => {
                    session.connection.send(chunk);
                }
                Some(CaptureEvent::Failed(e)) => break SessionOutcome::Failed(e),
                None => {
                    info!(session_id = %session.id, "Capture source ended");
                    capture_live = false;
                }
            },
            event = session.connection_events.recv() => match event {
                Some(ConnectionEvent::Opened) => {
                    shared.status.send_replace(SessionStatus::Active);
                    info!(session_id = %session.id, "Live session active");
                }
                Some(ConnectionEvent::Message(message)) => session.handle_message(message, &shared),
                Some(ConnectionEvent::Closed(e)) => break SessionOutcome::Failed(e),
                None => {
                    break SessionOutcome::Failed(LiveError::Transport(
                        "connection task ended".to_string(),
                    ))
                }
            },
            _ = ticker.tick() => {
                let speaking = session.scheduler.is_speaking();
                if *shared.speaking.borrow() != speaking {
                    shared.speaking.send_replace(speaking);
                }
            }
        }
    };

    session.teardown(&shared).await;

    if let SessionOutcome::Failed(e) = &outcome {
        error!(session_id = %session.id, "Live session failed: {}", e);
        shared.status.send_replace(SessionStatus::Error);
    }

    outcome
}

impl Session {
    fn handle_message(&mut self, message: ProtocolMessage, shared: &Shared) {
        match message {
            ProtocolMessage::ServerAudio { chunk } => {
                if self.scheduler.schedule(&chunk).is_some() {
                    shared.chunks_received.fetch_add(1, Ordering::Relaxed);
                }
            }
            ProtocolMessage::ServerText { text } => {
                shared.transcript.lock().push(TranscriptSegment {
                    text: text.clone(),
                    timestamp: Utc::now(),
                    turn: self.turn,
                });
                self.emit(TranscriptEvent::Text(text));
            }
            ProtocolMessage::TurnComplete => {
                debug!(session_id = %self.id, "Turn {} complete", self.turn);
                self.turn += 1;
                self.emit(TranscriptEvent::TurnComplete);
            }
            ProtocolMessage::Interrupted => {
                info!(session_id = %self.id, "Model interrupted; dropping queued audio");
                self.scheduler.interrupt();
            }
            ProtocolMessage::SetupComplete => {
                debug!(session_id = %self.id, "Setup acknowledged");
            }
            ProtocolMessage::Error { detail } => {
                warn!(session_id = %self.id, "Service reported an error: {}", detail);
                self.emit(TranscriptEvent::RemoteError(detail));
            }
            other => {
                debug!(session_id = %self.id, "Ignoring inbound {} message", other.kind());
            }
        }
    }

    fn emit(&self, event: TranscriptEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    /// Release everything the session owns. Runs once, at the end of the
    /// session task.
    async fn teardown(&mut self, shared: &Shared) {
        // Local devices first; the transport close may wait on the network
        self.capture.close();
        self.scheduler.reset();
        self.scheduler.close_output();

        shared.speaking.send_replace(false);
        shared.level.set(0.0);

        self.connection.close().await;

        info!(session_id = %self.id, "Session resources released");
    }
}
