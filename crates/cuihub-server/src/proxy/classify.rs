//! Dispatch of inbound requests by shape.

use std::sync::LazyLock;

use axum::http::{HeaderMap, Method, header};
use regex::Regex;

static MESSAGE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/api/conversations/([^/]+)/messages/?$").unwrap());

const START_PATH: &str = "/api/conversations/start";

/// Which intercepted POST this is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostKind {
    /// `POST /api/conversations/start`
    StartConversation,
    /// `POST /api/conversations/{id}/messages`
    SendMessage {
        /// Conversation the message belongs to.
        conversation_id: String,
    },
}

/// How a request to an account listener is handled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestShape {
    /// Service-worker asset answered locally.
    BlockedAsset,
    /// WebSocket upgrade tunnelled to the backend.
    Upgrade,
    /// `GET` on the stream prefix, relayed with inline completion detection.
    StreamRelay {
        /// Stream id taken from the path.
        stream_id: String,
    },
    /// Conversation start / message send, relayed then monitored.
    InterceptedPost(PostKind),
    /// Extensionless page `GET`, fetched and script-injected.
    HtmlPage,
    /// Everything else, proxied unbuffered.
    Passthrough,
}

impl RequestShape {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BlockedAsset => "blocked",
            Self::Upgrade => "upgrade",
            Self::StreamRelay { .. } => "stream",
            Self::InterceptedPost(_) => "intercept",
            Self::HtmlPage => "html",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Path rules for one proxy set.
#[derive(Clone, Debug)]
pub struct RouteRules {
    /// Stream-by-id prefix, with leading and trailing slash.
    pub stream_prefix: String,
    /// Exact service-worker asset paths to block.
    pub blocked_paths: Vec<String>,
}

impl RouteRules {
    /// Classify one request.
    ///
    /// Upgrades are checked right after blocked assets: an upgrade `GET` to
    /// an extensionless path would otherwise look like a page load.
    pub fn classify(&self, method: &Method, path: &str, headers: &HeaderMap) -> RequestShape {
        if self.is_blocked(path) {
            return RequestShape::BlockedAsset;
        }
        if is_websocket_upgrade(headers) {
            return RequestShape::Upgrade;
        }
        if *method == Method::GET {
            if let Some(stream_id) = self.stream_id(path) {
                return RequestShape::StreamRelay { stream_id };
            }
            if is_page_path(path) {
                return RequestShape::HtmlPage;
            }
        }
        if *method == Method::POST {
            if let Some(kind) = post_kind(path) {
                return RequestShape::InterceptedPost(kind);
            }
        }
        RequestShape::Passthrough
    }

    fn is_blocked(&self, path: &str) -> bool {
        self.blocked_paths.iter().any(|p| p == path) || last_segment(path).starts_with("workbox-")
    }

    /// Stream id for a path under the stream prefix: everything after the
    /// prefix, nested segments included.
    pub fn stream_id(&self, path: &str) -> Option<String> {
        let rest = path.strip_prefix(self.stream_prefix.as_str())?;
        let id = rest.trim_end_matches('/');
        (!id.is_empty()).then(|| id.to_string())
    }
}

fn post_kind(path: &str) -> Option<PostKind> {
    if path == START_PATH || path.strip_suffix('/') == Some(START_PATH) {
        return Some(PostKind::StartConversation);
    }
    let caps = MESSAGE_PATH.captures(path)?;
    Some(PostKind::SendMessage {
        conversation_id: caps[1].to_string(),
    })
}

/// Page loads: not under `/api/` or `/assets/` and no file extension.
fn is_page_path(path: &str) -> bool {
    if path.starts_with("/api/") || path == "/api" || path.starts_with("/assets/") {
        return false;
    }
    !last_segment(path).contains('.')
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")));
    upgrade && connection
}
