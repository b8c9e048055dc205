//! Application router.
//!
//! A single WebSocket endpoint carries one voice chat session per connection.
//! Status is reported in-band over the socket (`get_status`), so there are no
//! separate HTTP endpoints.

use crate::{state::AppState, ws};
use axum::{Router, routing::get};
use std::sync::Arc;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/{client_id}", get(ws::ws_handler))
        .with_state(state)
}
