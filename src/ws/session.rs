//! Manages the WebSocket connection lifecycle for a voice session.
//!
//! `ws_handler` accepts the upgrade and splits the socket into a writer task
//! and a reader loop; the session logic itself runs in `run_session` over
//! plain channels, so the tests can drive it without a real socket.

use super::{
    consolidator::{DebounceTimer, TranscriptConsolidator},
    protocol::{AudioConfig, ControlMessage, InboundMessage, ServerMessage},
    provider::{UpstreamEvent, UpstreamEvents, UpstreamSender},
    registry::{Session, SessionState},
};
use crate::{audio, config::ConsolidatorConfig, error::BridgeError, state::AppState};
use anyhow::Result;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{Instant, timeout},
};
use tracing::{Instrument, debug, info, instrument, warn};

/// One frame received from the client transport.
#[derive(Debug)]
pub enum ClientFrame {
    /// Raw PCM audio bytes.
    Binary(Bytes),
    /// A JSON control, text, or audio message.
    Text(String),
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

/// Serializes a server message and sends it over the WebSocket sink.
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> Result<()> {
    let payload = serde_json::to_string(msg)?;
    sink.send(Message::Text(payload.into())).await?;
    Ok(())
}

/// Pumps frames between the socket and the session task.
///
/// The writer task owns the sink and drains the session's outbound channel;
/// the reader loop forwards client frames inbound. Either side ending tears
/// the whole connection down.
#[instrument(name = "ws_session", skip_all, fields(client_id = %client_id))]
async fn handle_socket(socket: WebSocket, client_id: String, state: Arc<AppState>) {
    info!("Client connected.");
    let (mut sink, mut stream) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(256);
    let writer = tokio::spawn(
        async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = send_msg(&mut sink, &msg).await {
                    warn!("Failed to write to client socket: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        }
        .in_current_span(),
    );

    let (frame_tx, frame_rx) = mpsc::channel::<ClientFrame>(64);
    let session = tokio::spawn(run_session(state, client_id, out_tx, frame_rx).in_current_span());

    while let Some(Ok(msg)) = stream.next().await {
        let frame = match msg {
            Message::Binary(bytes) => ClientFrame::Binary(bytes),
            Message::Text(text) => ClientFrame::Text(text.to_string()),
            Message::Close(_) => break,
            _ => continue,
        };
        if frame_tx.send(frame).await.is_err() {
            break;
        }
    }

    drop(frame_tx);
    let _ = session.await;
    let _ = writer.await;
    info!("Client disconnected.");
}

/// Whether the client loop should keep running after handling a frame.
enum Flow {
    Continue,
    Stop,
}

/// Drives one session end to end: announce the connection, register the
/// session, open the upstream, then pump client frames until either side
/// closes. Always finishes through `finish_session`, so the client observes
/// exactly one `session_stopped`.
pub(crate) async fn run_session(
    state: Arc<AppState>,
    client_id: String,
    out: mpsc::Sender<ServerMessage>,
    mut frames: mpsc::Receiver<ClientFrame>,
) {
    let established = ServerMessage::ConnectionEstablished {
        client_id: client_id.clone(),
        auto_session: true,
        audio_config: AudioConfig::new(&state.config.voice_name),
    };
    if out.send(established).await.is_err() {
        return;
    }

    let session = state.registry.create(&client_id).await;
    info!(session_id = %session.session_id, "Session registered.");

    let handle = match timeout(
        state.config.handshake_timeout,
        state.upstream.open(&session),
    )
    .await
    {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            warn!("Upstream handshake failed: {e}");
            let _ = out.send(ServerMessage::Error { message: e.to_string() }).await;
            finish_session(&state, &session, &out).await;
            return;
        }
        Err(_) => {
            warn!("Upstream handshake timed out.");
            let message = BridgeError::UpstreamHandshake("handshake timed out".into()).to_string();
            let _ = out.send(ServerMessage::Error { message }).await;
            finish_session(&state, &session, &out).await;
            return;
        }
    };
    let (upstream, events) = handle.split();

    if !state.config.greeting.is_empty() {
        if let Err(e) = upstream.push_text(state.config.greeting.clone()).await {
            warn!("Failed to push greeting upstream: {e}");
        }
    }

    // The registry may have evicted this session while the handshake ran.
    if session.cancel.is_cancelled() {
        upstream.close();
        finish_session(&state, &session, &out).await;
        return;
    }

    session.advance(SessionState::Active);
    let started = ServerMessage::AutoSessionStarted {
        session_id: session.session_id.clone(),
        user_id: session.user_id.clone(),
        status: "active".to_string(),
    };
    if out.send(started).await.is_err() {
        upstream.close();
        finish_session(&state, &session, &out).await;
        return;
    }

    let listener = tokio::spawn(
        upstream_listener(
            events,
            out.clone(),
            session.clone(),
            state.config.consolidator,
        )
        .in_current_span(),
    );

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let flow = match frame {
                    ClientFrame::Binary(bytes) => match upstream.push_audio(bytes).await {
                        Ok(()) => Flow::Continue,
                        Err(_) => Flow::Stop,
                    },
                    ClientFrame::Text(text) => {
                        handle_text_frame(&state, &session, &upstream, &out, &text).await
                    }
                };
                if let Flow::Stop = flow {
                    break;
                }
            }
        }
    }

    session.advance(SessionState::Closing);
    session.cancel.cancel();
    let _ = listener.await;
    upstream.close();
    finish_session(&state, &session, &out).await;
}

/// Moves the session through Closing to Closed, unregisters it, and tells
/// the client. Safe to reach from any point in the session's life.
async fn finish_session(state: &AppState, session: &Session, out: &mpsc::Sender<ServerMessage>) {
    session.advance(SessionState::Closing);
    session.cancel.cancel();
    state.registry.remove(&session.session_id).await;
    session.advance(SessionState::Closed);
    let _ = out
        .send(ServerMessage::SessionStopped {
            session_id: session.session_id.clone(),
        })
        .await;
    info!(session_id = %session.session_id, "Session closed.");
}

/// Handles one JSON frame from the client.
async fn handle_text_frame(
    state: &AppState,
    session: &Session,
    upstream: &UpstreamSender,
    out: &mpsc::Sender<ServerMessage>,
    text: &str,
) -> Flow {
    let parsed = match serde_json::from_str::<InboundMessage>(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            let message = BridgeError::Protocol(e.to_string()).to_string();
            return reply(out, ServerMessage::Error { message }).await;
        }
    };

    match parsed {
        InboundMessage::Audio(frame) => {
            if !audio::is_pcm_mime(&frame.mime_type) {
                debug!(mime_type = %frame.mime_type, "Ignoring audio frame with unsupported MIME type.");
                return Flow::Continue;
            }
            let Some(data) = frame.data else {
                let message = BridgeError::Protocol("audio frame missing data".into()).to_string();
                return reply(out, ServerMessage::Error { message }).await;
            };
            match audio::decode_base64(&data) {
                Ok(bytes) => match upstream.push_audio(bytes.into()).await {
                    Ok(()) => Flow::Continue,
                    Err(_) => Flow::Stop,
                },
                Err(e) => {
                    let message = BridgeError::from(e).to_string();
                    reply(out, ServerMessage::Error { message }).await
                }
            }
        }
        InboundMessage::Control(ControlMessage::TextInput { text, .. }) => {
            if text.trim().is_empty() {
                let message = BridgeError::Protocol("empty text_input".into()).to_string();
                return reply(out, ServerMessage::Error { message }).await;
            }
            match upstream.push_text(text).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Stop,
            }
        }
        InboundMessage::Control(ControlMessage::Ping) => {
            let timestamp = Utc::now().timestamp_millis();
            reply(out, ServerMessage::Pong { timestamp }).await
        }
        InboundMessage::Control(ControlMessage::GetStatus) => {
            let status = ServerMessage::StatusResponse {
                server_status: "running".to_string(),
                total_sessions: state.registry.len().await,
                auto_session_mode: true,
                current_session: Some(session.status()),
            };
            reply(out, status).await
        }
        InboundMessage::Control(ControlMessage::StopSession) => Flow::Stop,
        InboundMessage::Control(ControlMessage::Unknown) | InboundMessage::Unknown(_) => {
            debug!("Ignoring unrecognized client message.");
            Flow::Continue
        }
    }
}

async fn reply(out: &mpsc::Sender<ServerMessage>, msg: ServerMessage) -> Flow {
    match out.send(msg).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Stop,
    }
}

/// Forwards upstream events to the client, consolidating transcript
/// fragments behind a debounce timer. Exits when the upstream is exhausted,
/// fails, or the session is cancelled; the first two also cancel the session
/// so the client loop unwinds.
async fn upstream_listener(
    mut events: UpstreamEvents,
    out: mpsc::Sender<ServerMessage>,
    session: Arc<Session>,
    config: ConsolidatorConfig,
) {
    let mut consolidator = TranscriptConsolidator::new(config);
    let mut timer = DebounceTimer::idle();

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => {
                timer.cancel();
                flush_transcript(&mut consolidator, &out).await;
                break;
            }
            _ = timer.fired() => {
                timer.cancel();
                flush_transcript(&mut consolidator, &out).await;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Upstream event stream exhausted.");
                    flush_transcript(&mut consolidator, &out).await;
                    session.cancel.cancel();
                    break;
                };
                match event {
                    UpstreamEvent::TextDelta { text, .. } => {
                        if consolidator.observe(&text, Instant::now()) {
                            timer.arm(config.debounce);
                        }
                    }
                    UpstreamEvent::AudioDelta { bytes, mime_type } => {
                        let chunk = ServerMessage::AudioChunk {
                            data: audio::encode_base64(&bytes),
                            size: bytes.len(),
                            mime_type,
                        };
                        if out.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    UpstreamEvent::ToolCall { name } => {
                        if out.send(ServerMessage::ToolCall { tool_name: name }).await.is_err() {
                            break;
                        }
                    }
                    UpstreamEvent::TurnComplete => {
                        timer.cancel();
                        flush_transcript(&mut consolidator, &out).await;
                        if out.send(ServerMessage::TurnComplete).await.is_err() {
                            break;
                        }
                    }
                    UpstreamEvent::Interrupted => {
                        if out.send(ServerMessage::Interrupted).await.is_err() {
                            break;
                        }
                    }
                    UpstreamEvent::Failure { reason } => {
                        warn!("Upstream stream failed: {reason}");
                        let message = BridgeError::UpstreamStream(reason).to_string();
                        let _ = out.send(ServerMessage::Error { message }).await;
                        timer.cancel();
                        flush_transcript(&mut consolidator, &out).await;
                        session.cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
}

async fn flush_transcript(
    consolidator: &mut TranscriptConsolidator,
    out: &mpsc::Sender<ServerMessage>,
) {
    if let Some(data) = consolidator.flush() {
        let _ = out.send(ServerMessage::Transcript { data }).await;
    }
}
