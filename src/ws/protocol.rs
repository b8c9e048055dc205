//! Defines the WebSocket message protocol between the client and the bridge.

use crate::audio;
use crate::ws::registry::SessionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audio parameters advertised to the client on connect.
#[derive(Serialize, Debug, Clone)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub voice_name: String,
    pub supported_formats: Vec<String>,
}

impl AudioConfig {
    pub fn new(voice_name: &str) -> Self {
        Self {
            input_sample_rate: audio::INPUT_SAMPLE_RATE,
            output_sample_rate: audio::OUTPUT_SAMPLE_RATE,
            voice_name: voice_name.to_string(),
            supported_formats: vec![audio::pcm_mime(audio::INPUT_SAMPLE_RATE)],
        }
    }
}

/// A JSON-framed audio chunk: base64 PCM with its MIME type.
#[derive(Deserialize, Debug)]
pub struct JsonAudioFrame {
    pub mime_type: String,
    pub data: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Control and text messages from the client, discriminated by `type`.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    TextInput {
        text: String,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    Ping,
    GetStatus,
    StopSession,
    /// Well-formed control message with an unrecognized tag.
    #[serde(other)]
    Unknown,
}

/// One inbound JSON payload from the client.
///
/// Audio frames carry a `mime_type` field instead of a `type` tag, so the two
/// shapes are tried in order. `Unknown` catches any other well-formed JSON;
/// those are logged and dropped rather than answered with an error.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum InboundMessage {
    Audio(JsonAudioFrame),
    Control(ControlMessage),
    Unknown(serde_json::Value),
}

/// Snapshot of one session, reported in `status_response`.
#[derive(Serialize, Debug, Clone)]
pub struct SessionStatus {
    pub session_id: String,
    pub user_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

/// Messages sent from the bridge to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent immediately after the transport is accepted.
    ConnectionEstablished {
        client_id: String,
        auto_session: bool,
        audio_config: AudioConfig,
    },
    /// The session reached Active and is ready for audio.
    AutoSessionStarted {
        session_id: String,
        user_id: String,
        status: String,
    },
    /// One consolidated transcript for a spoken turn.
    Transcript { data: String },
    /// A chunk of upstream voice audio, base64-encoded PCM.
    AudioChunk {
        data: String,
        size: usize,
        mime_type: String,
    },
    /// The upstream invoked a tool (informational).
    ToolCall { tool_name: String },
    TurnComplete,
    Interrupted,
    Error { message: String },
    /// Reply to `ping`; timestamp is wall-clock milliseconds.
    Pong { timestamp: i64 },
    StatusResponse {
        server_status: String,
        total_sessions: usize,
        auto_session_mode: bool,
        current_session: Option<SessionStatus>,
    },
    SessionStopped { session_id: String },
}
