use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{ProtocolDecoder, ProtocolMessage, DEFAULT_PLAYBACK_RATE};
use super::transport::{redact_endpoint, Connector, Frame, Transport};
use crate::audio::AudioChunk;
use crate::error::LiveError;

/// Longest a transport close may take before it is abandoned
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Active,
    Closed,
    Error,
}

/// What the connection reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Transport open and `Setup` sent; audio may flow
    Opened,
    Message(ProtocolMessage),
    /// The connection failed or the remote closed it. Not sent for a local close.
    Closed(LiveError),
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Chunks buffered for sending before new ones are dropped
    pub outbound_queue_depth: usize,
    /// Inbound rate assumed when a message omits one
    pub default_playback_rate: u32,
}

impl ConnectionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: String::new(),
            voice: String::new(),
            system_instruction: String::new(),
            outbound_queue_depth: 32,
            default_playback_rate: DEFAULT_PLAYBACK_RATE,
        }
    }

    pub fn setup_message(&self) -> ProtocolMessage {
        ProtocolMessage::Setup {
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
        }
    }
}

/// Connection counters
#[derive(Debug, Default)]
pub struct ConnectionStats {
    chunks_sent: AtomicU64,
    chunks_dropped: AtomicU64,
    messages_received: AtomicU64,
    decode_errors: AtomicU64,
}

impl ConnectionStats {
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent.load(Ordering::Relaxed)
    }

    pub fn chunks_dropped(&self) -> u64 {
        self.chunks_dropped.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

/// One persistent duplex connection to the live service
///
/// A background task owns the transport. It connects, sends `Setup` as the
/// first frame, and only then starts draining the outbound queue, so no
/// audio can precede the handshake.
pub struct ConnectionSession {
    state: Arc<Mutex<ConnectionState>>,
    stats: Arc<ConnectionStats>,
    outbound: mpsc::Sender<AudioChunk>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionSession {
    /// Start connecting. Must be called inside a tokio runtime.
    pub fn open(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let stats = Arc::new(ConnectionStats::default());
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_connection(
            connector,
            config,
            Arc::clone(&state),
            Arc::clone(&stats),
            outbound_rx,
            shutdown_rx,
            events_tx,
        ));

        let session = Self {
            state,
            stats,
            outbound: outbound_tx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        };

        (session, events_rx)
    }

    /// Queue a chunk for sending.
    ///
    /// Returns false when the chunk was dropped: the connection is not
    /// active yet (or any more), or the outbound queue is full.
    pub fn send(&self, chunk: AudioChunk) -> bool {
        if self.state() != ConnectionState::Active {
            self.stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Dropping chunk {}: connection not active", chunk.sequence);
            return false;
        }

        match self.outbound.try_send(chunk) {
            Ok(()) => true,
            Err(TrySendError::Full(chunk)) => {
                self.stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping chunk {}: outbound queue full", chunk.sequence);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Close the transport and wait for the connection task to finish.
    ///
    /// Bounded: a task still stuck on the transport after the close timeout
    /// is aborted. Idempotent.
    pub async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(CLOSE_TIMEOUT * 2, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Connection task ended abnormally: {}", e);
                *self.state.lock() = ConnectionState::Error;
            }
            Err(_) => {
                warn!("Connection task did not stop in time; aborting it");
                task.abort();
                let mut state = self.state.lock();
                if *state != ConnectionState::Error {
                    *state = ConnectionState::Closed;
                }
            }
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        // Dropping the shutdown sender wakes the task, which closes the transport
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn run_connection(
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    state: Arc<Mutex<ConnectionState>>,
    stats: Arc<ConnectionStats>,
    mut outbound_rx: mpsc::Receiver<AudioChunk>,
    mut shutdown_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let endpoint = redact_endpoint(&config.endpoint).to_string();

    let connected = tokio::select! {
        biased;
        _ = &mut shutdown_rx => {
            info!("Connection to {} cancelled before it opened", endpoint);
            *state.lock() = ConnectionState::Closed;
            return;
        }
        result = connector.connect(&config.endpoint) => result,
    };

    let mut transport = match connected {
        Ok(transport) => transport,
        Err(e) => {
            fail(&state, &events, e);
            return;
        }
    };

    let setup = tokio::select! {
        biased;
        _ = &mut shutdown_rx => {
            close_transport(transport.as_mut()).await;
            *state.lock() = ConnectionState::Closed;
            info!("Connection to {} closed during setup", endpoint);
            return;
        }
        result = send_setup(transport.as_mut(), &config) => result,
    };

    if let Err(e) = setup {
        close_transport(transport.as_mut()).await;
        fail(&state, &events, e);
        return;
    }

    *state.lock() = ConnectionState::Active;
    info!("Connection to {} active (model {})", endpoint, config.model);
    let _ = events.send(ConnectionEvent::Opened);

    let mut decoder = ProtocolDecoder::new(config.default_playback_rate);

    let failure = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break None,
            chunk = outbound_rx.recv() => {
                let Some(chunk) = chunk else { break None };
                let sequence = chunk.sequence;
                let frame = match (ProtocolMessage::AudioInput { chunk }).encode() {
                    Ok(json) => Frame::Text(json),
                    Err(e) => break Some(e),
                };
                // A peer that stops reading must not block shutdown
                let sent = tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break None,
                    result = transport.send(frame) => result,
                };
                if let Err(e) = sent {
                    break Some(e);
                }
                stats.chunks_sent.fetch_add(1, Ordering::Relaxed);
                debug!("Sent audio chunk {}", sequence);
            }
            frame = transport.recv() => match frame {
                Ok(Some(frame)) => match decoder.decode(&frame) {
                    Ok(messages) => {
                        for message in messages {
                            stats.messages_received.fetch_add(1, Ordering::Relaxed);
                            let _ = events.send(ConnectionEvent::Message(message));
                        }
                    }
                    Err(e) => {
                        stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Ignoring undecodable frame: {}", e);
                    }
                },
                Ok(None) => break Some(LiveError::RemoteClosed("connection ended".to_string())),
                Err(e) => break Some(e),
            },
        }
    };

    close_transport(transport.as_mut()).await;

    match failure {
        None => {
            *state.lock() = ConnectionState::Closed;
            info!(
                "Connection to {} closed ({} chunks sent, {} dropped)",
                endpoint,
                stats.chunks_sent(),
                stats.chunks_dropped()
            );
        }
        Some(e) => fail(&state, &events, e),
    }
}

async fn send_setup(transport: &mut dyn Transport, config: &ConnectionConfig) -> Result<(), LiveError> {
    let setup = config.setup_message().encode()?;
    transport.send(Frame::Text(setup)).await?;
    debug!("Setup sent for model {}", config.model);
    Ok(())
}

async fn close_transport(transport: &mut dyn Transport) {
    if tokio::time::timeout(CLOSE_TIMEOUT, transport.close())
        .await
        .is_err()
    {
        warn!("Transport close timed out after {:?}", CLOSE_TIMEOUT);
    }
}

fn fail(
    state: &Mutex<ConnectionState>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    error: LiveError,
) {
    *state.lock() = ConnectionState::Error;
    warn!("Connection failed: {}", error);
    let _ = events.send(ConnectionEvent::Closed(error));
}
