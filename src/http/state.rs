use crate::config::Config;
use crate::session::SessionController;
use std::sync::Arc;

/// Session fields used when a connect request leaves them out
#[derive(Debug, Clone, Default)]
pub struct SessionDefaults {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
}

impl SessionDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.live.model.clone(),
            voice_name: config.live.voice.clone(),
            system_instruction: config.live.system_instruction.clone(),
        }
    }
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub defaults: Arc<SessionDefaults>,
}

impl AppState {
    pub fn new(controller: Arc<SessionController>, defaults: SessionDefaults) -> Self {
        Self {
            controller,
            defaults: Arc::new(defaults),
        }
    }
}
