//! Dashboard server and logging settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Dashboard/observer server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardSettings {
    /// Bind address.
    pub host: String,
    /// Observer WebSocket + API port.
    pub port: u16,
    /// Ping interval for observer sockets in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Evict an observer that has not ponged for this long (milliseconds).
    pub heartbeat_timeout_ms: u64,
    /// Per-observer outbound queue length; a full queue drops messages.
    pub observer_queue: usize,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4005,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            observer_queue: 256,
        }
    }
}

impl DashboardSettings {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong deadline.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-target level overrides, e.g. `{"cuihub_server::proxy": "debug"}`.
    pub modules: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: std::collections::BTreeMap::new(),
        }
    }
}
