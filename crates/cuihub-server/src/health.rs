//! `/health` endpoint.

use std::time::Instant;

use cuihub_core::CuiState;
use serde::Serialize;

use crate::websocket::broadcast::BroadcastHub;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the dashboard is serving.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Connected dashboard observers.
    pub observers: usize,
    /// Configured accounts.
    pub accounts: usize,
    /// Accounts whose last known state is `processing`.
    pub processing: usize,
    /// Whether a sync cycle is in flight.
    pub syncing: bool,
}

/// Snapshot the hub's counters.
pub fn health_check(start_time: Instant, hub: &BroadcastHub, accounts: usize, syncing: bool) -> HealthResponse {
    let processing = hub
        .states()
        .iter()
        .filter(|s| s.state == CuiState::Processing)
        .count();
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        observers: hub.observer_count(),
        accounts,
        processing,
        syncing,
    }
}
