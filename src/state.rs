//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the session registry, the upstream client, and the
//! loaded configuration.

use crate::config::Config;
use crate::ws::provider::UpstreamClient;
use crate::ws::registry::SessionRegistry;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub config: Arc<Config>,
}
