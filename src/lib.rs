//! Voice Bridge Library Crate
//!
//! This library contains the session bridge between client-facing WebSocket
//! connections and an upstream realtime conversational AI engine: the session
//! registry, the per-session listener tasks, the transcript consolidator, and
//! the upstream adapter boundary. The `server` binary is a thin wrapper
//! around this library.

pub mod audio;
pub mod config;
pub mod error;
pub mod router;
pub mod state;
pub mod ws;
