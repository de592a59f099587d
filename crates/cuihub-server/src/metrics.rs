//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// Hub publishes (counter, labels: type).
pub const HUB_PUBLISH_TOTAL: &str = "hub_publish_total";
/// Observer sockets opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Observer sockets closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connected observers (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Messages dropped on full observer queues (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Observers evicted during publish (counter).
pub const WS_OBSERVER_EVICTIONS_TOTAL: &str = "ws_observer_evictions_total";
/// Proxied requests (counter, labels: account, route).
pub const PROXY_REQUESTS_TOTAL: &str = "proxy_requests_total";
/// Upstream failures (counter, labels: account, kind).
pub const PROXY_UPSTREAM_ERRORS_TOTAL: &str = "proxy_upstream_errors_total";
/// Inbound requests refused before forwarding (counter, labels: account, kind).
pub const PROXY_CLIENT_ERRORS_TOTAL: &str = "proxy_client_errors_total";
/// Stream monitors started (counter, labels: account).
pub const MONITORS_STARTED_TOTAL: &str = "monitors_started_total";
/// Stream monitors finished (counter, labels: account, outcome).
pub const MONITORS_FINISHED_TOTAL: &str = "monitors_finished_total";
/// Fallback `response-ready` publishes (counter, labels: account, reason).
pub const FALLBACKS_TOTAL: &str = "fallbacks_total";
/// Sync cycles (counter, labels: outcome).
pub const SYNC_CYCLES_TOTAL: &str = "sync_cycles_total";
