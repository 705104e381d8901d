use base64::Engine;
use tracing::debug;

use super::messages::{
    Content, GenerationConfig, MediaChunk, PrebuiltVoiceConfig, RealtimeInput,
    RealtimeInputMessage, ServerMessage, Setup, SetupMessage, SpeechConfig, TextPart, VoiceConfig,
};
use super::transport::Frame;
use crate::audio::AudioChunk;
use crate::error::LiveError;

/// Inbound audio rate when a mime type carries no `rate=` parameter
pub const DEFAULT_PLAYBACK_RATE: u32 = 24000;

/// A message exchanged with the live service
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    /// Handshake; always the first outbound frame
    Setup {
        model: String,
        voice: String,
        system_instruction: String,
    },
    /// Captured microphone audio
    AudioInput { chunk: AudioChunk },
    /// Model speech; the chunk carries the rate parsed from this message
    ServerAudio { chunk: AudioChunk },
    /// A text fragment of the model's turn
    ServerText { text: String },
    TurnComplete,
    /// The service acknowledged `Setup`
    SetupComplete,
    /// The user spoke over the model and the turn was abandoned
    Interrupted,
    Error { detail: String },
}

impl ProtocolMessage {
    /// Serialize an outbound message to its JSON wire form.
    pub fn encode(&self) -> Result<String, LiveError> {
        let json = match self {
            ProtocolMessage::Setup {
                model,
                voice,
                system_instruction,
            } => {
                let message = SetupMessage {
                    setup: Setup {
                        model: model.clone(),
                        generation_config: GenerationConfig {
                            response_modalities: vec!["AUDIO".to_string()],
                            speech_config: SpeechConfig {
                                voice_config: VoiceConfig {
                                    prebuilt_voice_config: PrebuiltVoiceConfig {
                                        voice_name: voice.clone(),
                                    },
                                },
                            },
                        },
                        system_instruction: if system_instruction.is_empty() {
                            None
                        } else {
                            Some(Content {
                                parts: vec![TextPart {
                                    text: system_instruction.clone(),
                                }],
                            })
                        },
                    },
                };
                serde_json::to_string(&message)
            }
            ProtocolMessage::AudioInput { chunk } => {
                let message = RealtimeInputMessage {
                    realtime_input: RealtimeInput {
                        media_chunks: vec![MediaChunk {
                            mime_type: pcm_mime_type(chunk.sample_rate),
                            data: base64::engine::general_purpose::STANDARD.encode(&chunk.data),
                        }],
                    },
                };
                serde_json::to_string(&message)
            }
            other => {
                return Err(LiveError::Protocol(format!(
                    "{} is not an outbound message",
                    other.kind()
                )))
            }
        };

        json.map_err(|e| LiveError::Protocol(format!("failed to encode message: {}", e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolMessage::Setup { .. } => "setup",
            ProtocolMessage::AudioInput { .. } => "audio_input",
            ProtocolMessage::ServerAudio { .. } => "server_audio",
            ProtocolMessage::ServerText { .. } => "server_text",
            ProtocolMessage::TurnComplete => "turn_complete",
            ProtocolMessage::SetupComplete => "setup_complete",
            ProtocolMessage::Interrupted => "interrupted",
            ProtocolMessage::Error { .. } => "error",
        }
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Extract the `rate=` parameter from a mime type such as `audio/pcm;rate=24000`.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse::<u32>().ok())
        .filter(|rate| *rate > 0)
}

/// Decodes inbound frames into protocol messages
///
/// Stamps each inbound audio chunk with its arrival order.
#[derive(Debug)]
pub struct ProtocolDecoder {
    default_rate: u32,
    next_sequence: u64,
}

impl ProtocolDecoder {
    pub fn new(default_rate: u32) -> Self {
        Self {
            default_rate,
            next_sequence: 0,
        }
    }

    /// Decode one frame. Binary frames are treated as UTF-8 JSON.
    ///
    /// A frame may carry several parts, so the result is a list in wire
    /// order. JSON objects with no recognised fields decode to an empty list.
    pub fn decode(&mut self, frame: &Frame) -> Result<Vec<ProtocolMessage>, LiveError> {
        let text = match frame {
            Frame::Text(text) => text.as_str(),
            Frame::Binary(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| LiveError::ProtocolDecode(format!("binary frame is not UTF-8: {}", e)))?,
        };
        self.decode_text(text)
    }

    pub fn decode_text(&mut self, text: &str) -> Result<Vec<ProtocolMessage>, LiveError> {
        let message: ServerMessage = serde_json::from_str(text)
            .map_err(|e| LiveError::ProtocolDecode(format!("invalid server message: {}", e)))?;

        let mut out = Vec::new();

        if message.setup_complete.is_some() {
            out.push(ProtocolMessage::SetupComplete);
        }

        if let Some(content) = message.server_content {
            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for part in parts {
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        out.push(ProtocolMessage::ServerText { text });
                    }
                }

                if let Some(inline) = part.inline_data {
                    let mime_type = inline.mime_type.unwrap_or_default();
                    if !mime_type.is_empty() && !mime_type.starts_with("audio/pcm") {
                        debug!("Ignoring inline data of type {}", mime_type);
                        continue;
                    }

                    let data = base64::engine::general_purpose::STANDARD
                        .decode(inline.data.unwrap_or_default())
                        .map_err(|e| LiveError::ProtocolDecode(format!("invalid base64 audio: {}", e)))?;
                    if data.is_empty() {
                        continue;
                    }

                    let sample_rate = parse_pcm_rate(&mime_type).unwrap_or(self.default_rate);
                    let chunk = AudioChunk::new(data, sample_rate, self.next_sequence);
                    self.next_sequence += 1;
                    out.push(ProtocolMessage::ServerAudio { chunk });
                }
            }

            if content.interrupted.unwrap_or(false) {
                out.push(ProtocolMessage::Interrupted);
            }
            if content.turn_complete.unwrap_or(false) {
                out.push(ProtocolMessage::TurnComplete);
            }
        }

        if let Some(error) = message.error {
            out.push(ProtocolMessage::Error {
                detail: error_detail(&error),
            });
        }

        Ok(out)
    }
}

fn error_detail(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("message") {
            Some(serde_json::Value::String(message)) => message.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}
