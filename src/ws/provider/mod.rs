//! Upstream conversational engine boundary.
//!
//! The bridge core depends only on the `UpstreamClient` contract defined
//! here; the live Gemini adapter in `gemini` implements it for production,
//! and a scripted stub drives the tests.

pub mod gemini;

use crate::error::BridgeError;
use crate::ws::registry::Session;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Input pushed to the upstream engine.
#[derive(Debug, Clone)]
pub enum UpstreamInput {
    Audio(Bytes),
    Text(String),
}

/// Incremental output produced by the upstream engine.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// A streamed transcript fragment; may overlap earlier fragments.
    TextDelta { text: String, partial: bool },
    /// A chunk of synthesized voice audio.
    AudioDelta { bytes: Bytes, mime_type: String },
    /// The engine invoked a tool (informational).
    ToolCall { name: String },
    TurnComplete,
    Interrupted,
    /// Unrecoverable stream failure; the session must close.
    Failure { reason: String },
}

/// Connection factory for the upstream engine, opened once per session.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn open(&self, session: &Session) -> Result<UpstreamHandle, BridgeError>;
}

/// Live connection to the upstream engine for one session.
pub struct UpstreamHandle {
    input: mpsc::Sender<UpstreamInput>,
    events: mpsc::Receiver<UpstreamEvent>,
    cancel: CancellationToken,
}

impl UpstreamHandle {
    pub fn new(
        input: mpsc::Sender<UpstreamInput>,
        events: mpsc::Receiver<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            input,
            events,
            cancel,
        }
    }

    /// Splits the handle into its push half and its pull half so the two
    /// listener tasks can own them independently.
    pub fn split(self) -> (UpstreamSender, UpstreamEvents) {
        (
            UpstreamSender {
                input: self.input,
                cancel: self.cancel,
            },
            UpstreamEvents {
                events: self.events,
            },
        )
    }
}

/// Push half of an upstream connection.
#[derive(Clone)]
pub struct UpstreamSender {
    input: mpsc::Sender<UpstreamInput>,
    cancel: CancellationToken,
}

impl UpstreamSender {
    pub async fn push_audio(&self, bytes: Bytes) -> Result<(), BridgeError> {
        self.input
            .send(UpstreamInput::Audio(bytes))
            .await
            .map_err(|_| BridgeError::UpstreamStream("upstream input channel closed".into()))
    }

    pub async fn push_text(&self, text: String) -> Result<(), BridgeError> {
        self.input
            .send(UpstreamInput::Text(text))
            .await
            .map_err(|_| BridgeError::UpstreamStream("upstream input channel closed".into()))
    }

    /// Releases the upstream connection. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Pull half of an upstream connection: a single-pass, non-restartable event
/// stream. `None` means the upstream is exhausted.
pub struct UpstreamEvents {
    events: mpsc::Receiver<UpstreamEvent>,
}

impl UpstreamEvents {
    pub async fn recv(&mut self) -> Option<UpstreamEvent> {
        self.events.recv().await
    }
}
