//! WebSocket Session Bridge
//!
//! This module contains the core logic for bridging client connections onto
//! the upstream realtime engine. It is structured into submodules:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `registry`: Tracks active sessions, enforcing the capacity and one-per-user policies.
//! - `consolidator`: Debounces and dedups streamed transcript fragments.
//! - `session`: Manages the connection lifecycle and runs the two listener tasks.
//! - `provider`: The upstream engine boundary and its live Gemini implementation.

pub mod consolidator;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod session;

pub use session::ws_handler;
