//! Observer socket lifecycle: register, pump events out, track pongs,
//! unregister.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use cuihub_settings::DashboardSettings;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::broadcast::BroadcastHub;
use super::connection::ObserverConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Observer socket tuning.
#[derive(Clone, Copy, Debug)]
pub struct ObserverConfig {
    /// Outbound queue length.
    pub queue: usize,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Pong deadline.
    pub heartbeat_timeout: Duration,
}

impl From<&DashboardSettings> for ObserverConfig {
    fn from(settings: &DashboardSettings) -> Self {
        Self {
            queue: settings.observer_queue,
            heartbeat_interval: settings.heartbeat_interval(),
            heartbeat_timeout: settings.heartbeat_timeout(),
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

/// Serve one dashboard observer until it disconnects, stops answering pings,
/// or `shutdown` fires.
///
/// Observers are receive-only; inbound text frames are ignored.
pub async fn serve_observer(
    socket: WebSocket,
    hub: Arc<BroadcastHub>,
    config: ObserverConfig,
    shutdown: CancellationToken,
) {
    let (conn, mut rx) = ObserverConnection::channel(config.queue);
    let observer_id = conn.id.clone();
    hub.register(Arc::clone(&conn));
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(observer_id = %observer_id, "observer connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let done = shutdown.child_token();

    let writer_done = done.clone();
    let writer_id = observer_id.clone();
    let writer = async move {
        let mut ping = tokio::time::interval(config.heartbeat_interval);
        let _ = ping.tick().await;
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(bytes::Bytes::new())).await.is_err() {
                        break;
                    }
                    trace!(observer_id = %writer_id, "sent ping");
                }
                () = writer_done.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    };

    let reader_conn = Arc::clone(&conn);
    let reader = async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Pong(_) => reader_conn.mark_alive(),
                Message::Close(_) => break,
                Message::Text(text) => {
                    reader_conn.mark_alive();
                    debug!(observer_id = %reader_conn.id, len = text.as_str().len(), "ignoring observer text frame");
                }
                Message::Binary(_) | Message::Ping(_) => reader_conn.mark_alive(),
            }
        }
    };

    let heartbeat = run_heartbeat(
        Arc::clone(&conn),
        config.heartbeat_interval,
        config.heartbeat_timeout,
        done.clone(),
    );

    let reason = tokio::select! {
        () = writer => "writer closed",
        () = reader => "client closed",
        result = heartbeat => match result {
            HeartbeatResult::TimedOut => "heartbeat timeout",
            HeartbeatResult::Closed => "queue closed",
            HeartbeatResult::Cancelled => "shutdown",
        },
    };
    done.cancel();

    hub.unregister(&observer_id);
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    info!(
        observer_id = %observer_id,
        reason,
        dropped = conn.drop_count(),
        age_secs = conn.age().as_secs(),
        "observer disconnected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_follows_dashboard_settings() {
        let settings = DashboardSettings {
            observer_queue: 16,
            heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 3_000,
            ..DashboardSettings::default()
        };
        let config = ObserverConfig::from(&settings);
        assert_eq!(config.queue, 16);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(3));
    }

    #[test]
    fn defaults_match_dashboard_defaults() {
        let from_settings = ObserverConfig::from(&DashboardSettings::default());
        let default = ObserverConfig::default();
        assert_eq!(from_settings.queue, default.queue);
        assert_eq!(from_settings.heartbeat_interval, default.heartbeat_interval);
        assert_eq!(from_settings.heartbeat_timeout, default.heartbeat_timeout);
    }
}
