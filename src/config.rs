use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// WebSocket endpoint of the live service
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub outbound_queue_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub chunk_threshold_samples: usize,
    pub capture_queue_depth: usize,
    /// Rate assumed for inbound audio that does not declare one
    pub playback_sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Config {
    /// Load built-in defaults, then `path` (if it exists), then
    /// `LINGO_VOICE__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = Self::defaults()?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LINGO_VOICE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Built-in defaults only
    pub fn default_config() -> Result<Self> {
        Ok(Self::defaults()?.build()?.try_deserialize()?)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(config::Config::builder()
            .set_default("service.name", "lingo-voice")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8787)?
            .set_default(
                "live.endpoint",
                "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent",
            )?
            .set_default("live.api_key_env", "GEMINI_API_KEY")?
            .set_default("live.model", "models/gemini-2.0-flash-exp")?
            .set_default("live.voice", "Puck")?
            .set_default(
                "live.system_instruction",
                "You are a friendly conversation partner helping the user practise a language.",
            )?
            .set_default("live.outbound_queue_depth", 32)?
            .set_default("audio.capture_sample_rate", 16000)?
            .set_default("audio.chunk_threshold_samples", 4096)?
            .set_default("audio.capture_queue_depth", 32)?
            .set_default("audio.playback_sample_rate", 24000)?
            .set_default("audio.echo_cancellation", true)?
            .set_default("audio.noise_suppression", true)?
            .set_default("audio.auto_gain_control", true)?)
    }
}
