//! Bridge failure taxonomy.
//!
//! Per-frame failures (`Protocol`, `AudioDecode`) are reported to the client
//! as an `error` message and the session keeps running. Upstream failures
//! (`UpstreamHandshake`, `UpstreamStream`) end the session through the normal
//! Closing path, so the client always observes a `session_stopped`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed client frame: {0}")]
    Protocol(String),
    #[error("failed to decode audio payload: {0}")]
    AudioDecode(#[from] base64::DecodeError),
    #[error("upstream handshake failed: {0}")]
    UpstreamHandshake(String),
    #[error("upstream stream failed: {0}")]
    UpstreamStream(String),
}

impl BridgeError {
    /// True when the session should keep running after reporting the error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::Protocol(_) | BridgeError::AudioDecode(_)
        )
    }
}
