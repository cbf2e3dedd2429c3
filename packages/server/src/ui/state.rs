//! Server state shared across request handlers.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::usecase::RoomCoordinator;

/// Shared application state
pub struct AppState {
    /// Room/membership coordinator for this process
    pub coordinator: Arc<RoomCoordinator>,
    /// Process start time (health endpoint uptime)
    pub started_at: Instant,
    /// Flipped to `true` when the process begins shutting down; open
    /// sockets watch this and run their normal disconnect cleanup.
    pub shutdown: watch::Receiver<bool>,
}
