//! Live adapter for the Gemini bidirectional streaming API.

use super::{UpstreamClient, UpstreamEvent, UpstreamHandle, UpstreamInput};
use crate::{
    audio,
    config::Config,
    error::BridgeError,
    ws::registry::Session,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// --- Local Gemini wire types (for encapsulation) ---
mod wire {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage {
        Setup(BidiGenerateContentSetup),
        RealtimeInput(BidiGenerateContentRealtimeInput),
        ClientContent(BidiGenerateContentClientContent),
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentSetup {
        pub model: String,
        pub generation_config: GenerationConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub speech_config: Option<SpeechConfig>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentRealtimeInput {
        pub audio: Blob,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentClientContent {
        pub turns: Vec<Content>,
        pub turn_complete: bool,
    }
    #[derive(Serialize)]
    pub(super) struct Content {
        pub role: String,
        pub parts: Vec<Part>,
    }
    #[derive(Serialize)]
    pub(super) struct Part {
        pub text: String,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<serde_json::Value>,
        pub server_content: Option<LiveServerContent>,
        pub tool_call: Option<ToolCallMessage>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct LiveServerContent {
        pub model_turn: Option<ServerContentTurn>,
        pub turn_complete: Option<bool>,
        pub interrupted: Option<bool>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerContentTurn {
        pub parts: Vec<ServerPart>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub text: Option<String>,
        pub inline_data: Option<ServerBlob>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerBlob {
        pub mime_type: Option<String>,
        pub data: String,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ToolCallMessage {
        #[serde(default)]
        pub function_calls: Vec<FunctionCall>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct FunctionCall {
        pub name: String,
    }
}

/// Opens one Gemini Live WebSocket per session and bridges it onto the
/// channel-based upstream contract.
pub struct GeminiLiveClient {
    api_key: String,
    model: String,
    voice_name: String,
}

impl GeminiLiveClient {
    pub fn new(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.clone(),
            model: config.model.clone(),
            voice_name: config.voice_name.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent?key={}",
            self.api_key
        )
    }

    fn setup_message(&self) -> wire::ClientMessage {
        wire::ClientMessage::Setup(wire::BidiGenerateContentSetup {
            model: self.model.clone(),
            generation_config: wire::GenerationConfig {
                response_modalities: vec![wire::ResponseModality::Audio],
                speech_config: Some(wire::SpeechConfig {
                    voice_config: wire::VoiceConfig {
                        prebuilt_voice_config: wire::PrebuiltVoiceConfig {
                            voice_name: self.voice_name.clone(),
                        },
                    },
                }),
            },
        })
    }
}

#[async_trait]
impl UpstreamClient for GeminiLiveClient {
    async fn open(&self, session: &Session) -> Result<UpstreamHandle, BridgeError> {
        let (ws_stream, _) = connect_async(self.endpoint())
            .await
            .map_err(|e| BridgeError::UpstreamHandshake(e.to_string()))?;
        let (mut gemini_tx, mut gemini_rx) = ws_stream.split();

        let setup_payload = serde_json::to_string(&self.setup_message())
            .map_err(|e| BridgeError::UpstreamHandshake(e.to_string()))?;
        gemini_tx
            .send(WsMessage::Text(setup_payload.into()))
            .await
            .map_err(|e| BridgeError::UpstreamHandshake(e.to_string()))?;

        // Wait for `setupComplete` before handing the connection over.
        loop {
            let msg = gemini_rx.next().await.ok_or_else(|| {
                BridgeError::UpstreamHandshake("connection closed during setup".into())
            })?;
            match msg {
                Ok(WsMessage::Text(text)) => {
                    match serde_json::from_str::<wire::ServerMessage>(&text) {
                        Ok(parsed) if parsed.setup_complete.is_some() => break,
                        Ok(parsed) => {
                            warn!(?parsed, "unexpected message during Gemini setup");
                        }
                        Err(e) => {
                            return Err(BridgeError::UpstreamHandshake(format!(
                                "unparseable setup response: {e}"
                            )));
                        }
                    }
                }
                Ok(WsMessage::Close(frame)) => {
                    return Err(BridgeError::UpstreamHandshake(format!(
                        "closed during setup: {frame:?}"
                    )));
                }
                Ok(_) => {}
                Err(e) => return Err(BridgeError::UpstreamHandshake(e.to_string())),
            }
        }
        info!(session_id = %session.session_id, "Gemini session setup is complete.");

        let (event_tx, event_rx) = mpsc::channel(256);
        let (input_tx, input_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        tokio::spawn(run_bridge(
            gemini_tx,
            gemini_rx,
            input_rx,
            event_tx,
            cancel.clone(),
        ));

        Ok(UpstreamHandle::new(input_tx, event_rx, cancel))
    }
}

type GeminiSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type GeminiStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Proxies between the session channels and the Gemini socket until either
/// side closes or the cancellation token fires.
async fn run_bridge(
    mut gemini_tx: GeminiSink,
    mut gemini_rx: GeminiStream,
    mut input_rx: mpsc::Receiver<UpstreamInput>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = gemini_tx.send(WsMessage::Close(None)).await;
                break;
            }
            input = input_rx.recv() => {
                let Some(input) = input else { break };
                let message = match input {
                    UpstreamInput::Audio(bytes) => {
                        wire::ClientMessage::RealtimeInput(wire::BidiGenerateContentRealtimeInput {
                            audio: wire::Blob {
                                mime_type: audio::pcm_mime(audio::INPUT_SAMPLE_RATE),
                                data: audio::encode_base64(&bytes),
                            },
                        })
                    }
                    UpstreamInput::Text(text) => {
                        wire::ClientMessage::ClientContent(wire::BidiGenerateContentClientContent {
                            turns: vec![wire::Content {
                                role: "user".to_string(),
                                parts: vec![wire::Part { text }],
                            }],
                            turn_complete: true,
                        })
                    }
                };
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("failed to serialize Gemini client message: {e}");
                        continue;
                    }
                };
                if let Err(e) = gemini_tx.send(WsMessage::Text(payload.into())).await {
                    let _ = event_tx
                        .send(UpstreamEvent::Failure { reason: e.to_string() })
                        .await;
                    break;
                }
            }
            msg = gemini_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        for event in parse_events(&text) {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(?frame, "Gemini WebSocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = event_tx
                            .send(UpstreamEvent::Failure { reason: e.to_string() })
                            .await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }
    // Dropping event_tx signals exhaustion to the session.
}

/// Translates one Gemini server frame into zero or more upstream events,
/// preserving the order parts arrive in.
fn parse_events(text: &str) -> Vec<UpstreamEvent> {
    let parsed = match serde_json::from_str::<wire::ServerMessage>(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("unparseable Gemini server message: {e}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if let Some(tool_call) = parsed.tool_call {
        for call in tool_call.function_calls {
            events.push(UpstreamEvent::ToolCall { name: call.name });
        }
    }
    if let Some(content) = parsed.server_content {
        if let Some(model_turn) = content.model_turn {
            for part in model_turn.parts {
                if let Some(text) = part.text {
                    events.push(UpstreamEvent::TextDelta { text, partial: true });
                }
                if let Some(blob) = part.inline_data {
                    match audio::decode_base64(&blob.data) {
                        Ok(bytes) => events.push(UpstreamEvent::AudioDelta {
                            bytes: bytes.into(),
                            mime_type: blob
                                .mime_type
                                .unwrap_or_else(|| audio::pcm_mime(audio::OUTPUT_SAMPLE_RATE)),
                        }),
                        Err(e) => warn!("dropping undecodable Gemini audio blob: {e}"),
                    }
                }
            }
        }
        if content.interrupted == Some(true) {
            events.push(UpstreamEvent::Interrupted);
        }
        if content.turn_complete == Some(true) {
            events.push(UpstreamEvent::TurnComplete);
        }
    }
    events
}
