use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lingo_voice::audio::{
    AudioDevices, AudioOutput, CaptureBackend, CpalBackend, CpalDevices, CpalOutput, FileBackend,
    InputDeviceInfo, VirtualOutput,
};
use lingo_voice::http::SessionDefaults;
use lingo_voice::session::TranscriptSink;
use lingo_voice::{
    create_router, AppState, Config, ControllerSettings, LiveError, SessionConfig,
    SessionController, TranscriptEvent, WsConnector,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lingo-voice", version, about = "Real-time voice conversations with a live model")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, global = true, default_value = "config/lingo-voice")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// List input devices
    Devices,
    /// Hold one live conversation until Ctrl-C
    Talk {
        /// Prebuilt voice name
        #[arg(long)]
        voice: Option<String>,
        /// System instruction for the model
        #[arg(long)]
        instruction: Option<String>,
        /// Input device identifier (see `devices`)
        #[arg(long)]
        device: Option<String>,
        /// Replay a WAV file instead of using the microphone
        #[arg(long)]
        input_file: Option<PathBuf>,
        /// Discard model audio instead of playing it
        #[arg(long)]
        mute: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lingo_voice=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Lingo Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Devices => list_devices(),
        Command::Talk {
            voice,
            instruction,
            device,
            input_file,
            mute,
        } => {
            let session = SessionConfig {
                model: cfg.live.model.clone(),
                voice_name: voice.unwrap_or_else(|| cfg.live.voice.clone()),
                system_instruction: instruction.unwrap_or_else(|| cfg.live.system_instruction.clone()),
                device_id: device,
            };
            let devices = TalkDevices {
                host: CpalDevices::new(),
                input_file,
                mute,
            };
            talk(cfg, session, devices).await
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let controller = Arc::new(SessionController::new(
        Arc::new(CpalDevices::new()),
        Arc::new(WsConnector::new()),
        ControllerSettings::from_config(&cfg),
    ));

    let state = AppState::new(Arc::clone(&controller), SessionDefaults::from_config(&cfg));
    let router = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    controller.disconnect().await;
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = CpalDevices::new()
        .list_input_devices()
        .context("Failed to list input devices")?;

    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}{}", device.label, marker);
    }

    Ok(())
}

async fn talk(cfg: Config, session: SessionConfig, devices: TalkDevices) -> Result<()> {
    let controller = SessionController::new(
        Arc::new(devices),
        Arc::new(WsConnector::new()),
        ControllerSettings::from_config(&cfg),
    );

    let sink: TranscriptSink = Arc::new(|event: TranscriptEvent| match event {
        TranscriptEvent::Text(text) => {
            print!("{}", text);
            std::io::stdout().flush().ok();
        }
        TranscriptEvent::TurnComplete => println!(),
        TranscriptEvent::RemoteError(detail) => eprintln!("\n[service error] {}", detail),
    });

    let session_id = controller.connect(session, Some(sink)).await?;
    info!("Session {} started; press Ctrl-C to stop", session_id);

    let failed = tokio::select! {
        _ = tokio::signal::ctrl_c() => false,
        _ = controller.wait_for_failure() => true,
    };

    let stats = controller.disconnect().await;
    info!(
        "Session ended: {:.1}s, {} chunks sent, {} received, {} dropped",
        stats.duration_secs, stats.chunks_sent, stats.chunks_received, stats.chunks_dropped
    );

    if failed {
        anyhow::bail!("Live session failed; see log for details");
    }
    Ok(())
}

/// Devices for the `talk` command: microphone or WAV file in, speaker or
/// nothing out
struct TalkDevices {
    host: CpalDevices,
    input_file: Option<PathBuf>,
    mute: bool,
}

impl AudioDevices for TalkDevices {
    fn list_input_devices(&self) -> Result<Vec<InputDeviceInfo>, LiveError> {
        match &self.input_file {
            Some(path) => Ok(vec![InputDeviceInfo {
                id: path.display().to_string(),
                label: format!("WAV file {}", path.display()),
                is_default: true,
            }]),
            None => self.host.list_input_devices(),
        }
    }

    fn capture_backend(&self) -> Box<dyn CaptureBackend> {
        match &self.input_file {
            Some(path) => Box::new(FileBackend::new(path.clone())),
            None => Box::new(CpalBackend::new()),
        }
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, LiveError> {
        if self.mute {
            warn!("Model audio muted");
            return Ok(Box::new(VirtualOutput::realtime()));
        }
        Ok(Box::new(CpalOutput::open()?))
    }
}
