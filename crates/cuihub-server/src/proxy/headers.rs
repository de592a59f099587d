//! Header hygiene for forwarded requests and relayed responses.

use axum::http::HeaderMap;
use axum::http::header::{
    ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, COOKIE, HOST, HeaderName,
};

/// Per-hop headers that must not cross the proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Request headers to send upstream: hop-by-hop and `host` removed.
pub fn forward_request_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(src.len());
    for (name, value) in src {
        if is_hop_by_hop(name) || *name == HOST {
            continue;
        }
        let _ = out.append(name.clone(), value.clone());
    }
    out
}

/// Request headers for a streamed relay: as [`forward_request_headers`],
/// without content-encoding negotiation so chunks arrive as plain text.
pub fn relay_request_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = forward_request_headers(src);
    let _ = out.remove(ACCEPT_ENCODING);
    out
}

/// The credentials a stream monitor replays against the backend.
pub fn auth_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in [COOKIE, AUTHORIZATION] {
        for value in src.get_all(&name) {
            let _ = out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Response headers to relay to the client: hop-by-hop removed.
pub fn relay_response_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(src.len());
    for (name, value) in src {
        if !is_hop_by_hop(name) {
            let _ = out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Response headers for a rewritten body: as [`relay_response_headers`],
/// minus the now-stale length and encoding.
pub fn rewritten_response_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = relay_response_headers(src);
    let _ = out.remove(CONTENT_LENGTH);
    let _ = out.remove(CONTENT_ENCODING);
    out
}
