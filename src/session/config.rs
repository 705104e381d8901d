use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::{CaptureConfig, DeviceSelector};
use crate::config::Config;
use crate::error::LiveError;
use crate::live::{ConnectionConfig, DEFAULT_PLAYBACK_RATE};

/// What feature code supplies for one live conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model identifier, passed to the service unchanged
    pub model: String,

    /// Prebuilt voice name (e.g., "Puck")
    pub voice_name: String,

    /// System prompt for the conversation
    pub system_instruction: String,

    /// Input device identifier; `None` selects the default input
    #[serde(default)]
    pub device_id: Option<String>,
}

impl SessionConfig {
    pub fn device(&self) -> DeviceSelector {
        DeviceSelector::from_id(self.device_id.clone())
    }
}

/// Runtime settings for a [`super::SessionController`]
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Full endpoint URL, API key included
    pub endpoint_url: String,
    pub capture: CaptureConfig,
    pub outbound_queue_depth: usize,
    /// Inbound rate assumed when a message omits one
    pub default_playback_rate: u32,
}

impl ControllerSettings {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            capture: CaptureConfig::default(),
            outbound_queue_depth: 32,
            default_playback_rate: DEFAULT_PLAYBACK_RATE,
        }
    }

    /// Build settings from configuration, reading the API key from the
    /// environment variable named in `live.api_key_env`.
    pub fn from_config(config: &Config) -> Self {
        let key = std::env::var(&config.live.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());
        Self::from_config_with_key(config, key.as_deref())
    }

    pub fn from_config_with_key(config: &Config, api_key: Option<&str>) -> Self {
        let endpoint = &config.live.endpoint;
        let endpoint_url = match api_key {
            Some(key) => {
                let separator = if endpoint.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", endpoint, separator, key)
            }
            None => {
                warn!(
                    "{} is not set; connecting to {} without an API key",
                    config.live.api_key_env, endpoint
                );
                endpoint.clone()
            }
        };

        Self {
            endpoint_url,
            capture: CaptureConfig {
                sample_rate: config.audio.capture_sample_rate,
                chunk_threshold_samples: config.audio.chunk_threshold_samples,
                queue_depth: config.audio.capture_queue_depth,
                echo_cancellation: config.audio.echo_cancellation,
                noise_suppression: config.audio.noise_suppression,
                auto_gain_control: config.audio.auto_gain_control,
            },
            outbound_queue_depth: config.live.outbound_queue_depth,
            default_playback_rate: config.audio.playback_sample_rate,
        }
    }

    /// Reject settings no session could run with.
    pub fn validate(&self) -> Result<(), LiveError> {
        if !(self.endpoint_url.starts_with("ws://") || self.endpoint_url.starts_with("wss://")) {
            return Err(LiveError::Config(
                "endpoint must be a ws:// or wss:// URL".to_string(),
            ));
        }
        if self.capture.sample_rate == 0 || self.default_playback_rate == 0 {
            return Err(LiveError::Config("sample rates must be non-zero".to_string()));
        }
        if self.capture.chunk_threshold_samples == 0 {
            return Err(LiveError::Config(
                "chunk threshold must be at least one sample".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn connection_config(&self, session: &SessionConfig) -> ConnectionConfig {
        ConnectionConfig {
            endpoint: self.endpoint_url.clone(),
            model: session.model.clone(),
            voice: session.voice_name.clone(),
            system_instruction: session.system_instruction.clone(),
            outbound_queue_depth: self.outbound_queue_depth,
            default_playback_rate: self.default_playback_rate,
        }
    }
}
