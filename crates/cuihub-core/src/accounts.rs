//! Per-account route table entries.

use serde::{Deserialize, Serialize};

use crate::ids::AccountId;

/// One proxied account: a local listener port forwarding to a backend.
///
/// Loaded once at startup and immutable for the life of the process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRoute {
    /// Account name, also the `cuiId` in hub events.
    pub id: AccountId,
    /// Local port the proxy listens on for this account.
    pub local_port: u16,
    /// Backend origin, e.g. `http://127.0.0.1:3001`.
    pub target_base_url: String,
}

impl AccountRoute {
    /// Create a route.
    pub fn new(id: impl Into<AccountId>, local_port: u16, target_base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local_port,
            target_base_url: target_base_url.into(),
        }
    }

    /// Backend origin without a trailing slash.
    pub fn base(&self) -> &str {
        self.target_base_url.trim_end_matches('/')
    }

    /// Absolute backend URL for a request path (with optional query).
    pub fn target_url(&self, path_and_query: &str) -> String {
        join_url(self.base(), path_and_query)
    }

    /// Backend WebSocket URL for a request path (`http` → `ws`, `https` → `wss`).
    pub fn ws_target_url(&self, path_and_query: &str) -> String {
        let base = self.base();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        join_url(&ws_base, path_and_query)
    }

    /// Whether the target URL uses a scheme the proxy can speak.
    pub fn has_http_scheme(&self) -> bool {
        self.target_base_url.starts_with("http://") || self.target_base_url.starts_with("https://")
    }
}

/// Join a base origin and a path, tolerating a missing leading slash.
pub fn join_url(base: &str, path_and_query: &str) -> String {
    let base = base.trim_end_matches('/');
    if path_and_query.is_empty() {
        format!("{base}/")
    } else if path_and_query.starts_with('/') {
        format!("{base}{path_and_query}")
    } else {
        format!("{base}/{path_and_query}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(base: &str) -> AccountRoute {
        AccountRoute::new("rafael", 5001, base)
    }

    #[test]
    fn target_url_joins_path_and_query() {
        let r = route("http://127.0.0.1:3001");
        assert_eq!(
            r.target_url("/api/stream/abc?x=1"),
            "http://127.0.0.1:3001/api/stream/abc?x=1"
        );
    }

    #[test]
    fn trailing_slash_on_base_is_ignored() {
        let r = route("http://127.0.0.1:3001/");
        assert_eq!(r.target_url("/index"), "http://127.0.0.1:3001/index");
        assert_eq!(r.target_url(""), "http://127.0.0.1:3001/");
    }

    #[test]
    fn ws_url_swaps_scheme() {
        assert_eq!(route("http://h:1").ws_target_url("/ws"), "ws://h:1/ws");
        assert_eq!(route("https://h").ws_target_url("/ws?t=1"), "wss://h/ws?t=1");
    }

    #[test]
    fn scheme_check() {
        assert!(route("http://h").has_http_scheme());
        assert!(route("https://h").has_http_scheme());
        assert!(!route("ftp://h").has_http_scheme());
        assert!(!route("h:3001").has_http_scheme());
    }

    #[test]
    fn deserializes_camel_case() {
        let r: AccountRoute = serde_json::from_str(
            r#"{"id":"rafael","localPort":5001,"targetBaseUrl":"http://127.0.0.1:3001"}"#,
        )
        .unwrap();
        assert_eq!(r, route("http://127.0.0.1:3001"));
    }
}
