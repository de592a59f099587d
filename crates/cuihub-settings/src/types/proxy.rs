//! Proxy routing and timing settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-account proxy behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
    /// Path prefix of the stream-by-id endpoint (`/api/stream/{id}`).
    pub stream_prefix: String,
    /// Service-worker asset paths answered locally instead of proxied.
    pub blocked_paths: Vec<String>,
    /// Stream monitor watchdog in milliseconds.
    pub monitor_timeout_ms: u64,
    /// Delay before the fallback `response-ready` when an intercepted POST
    /// yields no streaming id (milliseconds).
    pub post_fallback_ms: u64,
    /// Delay before the fallback `response-ready` when a monitor cannot open
    /// or loses its stream (milliseconds).
    pub monitor_fallback_ms: u64,
    /// Largest request body buffered by the interception path.
    pub max_body_bytes: usize,
    /// Connect timeout for upstream requests in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            stream_prefix: "/api/stream/".to_string(),
            blocked_paths: vec![
                "/sw.js".to_string(),
                "/service-worker.js".to_string(),
                "/registerSW.js".to_string(),
            ],
            monitor_timeout_ms: 120_000,
            post_fallback_ms: 10_000,
            monitor_fallback_ms: 8_000,
            max_body_bytes: 32 * 1024 * 1024,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ProxySettings {
    /// Monitor watchdog.
    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor_timeout_ms)
    }

    /// Fallback delay after an intercepted POST without a streaming id.
    pub fn post_fallback(&self) -> Duration {
        Duration::from_millis(self.post_fallback_ms)
    }

    /// Fallback delay after a failed monitor.
    pub fn monitor_fallback(&self) -> Duration {
        Duration::from_millis(self.monitor_fallback_ms)
    }

    /// Upstream connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
