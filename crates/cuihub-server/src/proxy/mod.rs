//! Per-account reverse proxy.
//!
//! Each account listener runs one [`Router`] whose fallback handler
//! classifies the request ([`classify::RouteRules::classify`]) and hands it
//! to the matching path: blocked service-worker asset, WebSocket tunnel,
//! stream relay, intercepted POST, HTML injection, or plain passthrough.

pub mod classify;
pub mod headers;
pub mod inject;
pub mod intercept;
pub mod relay;
pub mod transparent;
pub mod tunnel;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use cuihub_core::{AccountRoute, CuiState, HubEvent, ProxyError};
use cuihub_settings::ProxySettings;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use self::classify::{RequestShape, RouteRules};
use crate::metrics::{PROXY_CLIENT_ERRORS_TOTAL, PROXY_REQUESTS_TOTAL, PROXY_UPSTREAM_ERRORS_TOTAL};
use crate::monitor::MonitorSpawner;
use crate::websocket::broadcast::BroadcastHub;

/// Stand-in served for blocked service-worker scripts. A browser that
/// already installed the real worker replaces it with this one, which
/// unregisters itself.
const BLOCKED_WORKER_BODY: &str = "self.addEventListener('install', () => self.skipWaiting());\n\
self.addEventListener('activate', () => { self.registration.unregister(); });\n";

/// Everything one account listener needs to handle a request.
#[derive(Clone)]
pub struct AccountContext {
    /// The account this listener serves.
    pub route: Arc<AccountRoute>,
    /// Where state events go.
    pub hub: Arc<BroadcastHub>,
    /// Shared upstream client.
    pub client: reqwest::Client,
    /// Proxy tuning.
    pub settings: Arc<ProxySettings>,
    /// Path classification rules.
    pub rules: Arc<RouteRules>,
    /// Launches stream monitors for intercepted POSTs.
    pub monitors: Arc<dyn MonitorSpawner>,
    /// Cancels fallback timers on shutdown.
    pub shutdown: CancellationToken,
}

impl AccountContext {
    /// Publish a state change for this account.
    pub fn publish_state(&self, state: CuiState) {
        let _ = self
            .hub
            .publish(&HubEvent::state(self.route.id.clone(), state));
    }

    /// Publish `cui-response-ready` for this account.
    pub fn publish_response_ready(&self) {
        let _ = self
            .hub
            .publish(&HubEvent::response_ready(self.route.id.clone()));
    }

    /// Log and count a request refused before reaching the backend, then
    /// build the client response.
    pub fn client_rejected(&self, err: &ProxyError, path: &str) -> Response {
        warn!(
            account_id = %self.route.id,
            path,
            kind = err.error_kind(),
            error = %err,
            "client request rejected"
        );
        counter!(
            PROXY_CLIENT_ERRORS_TOTAL,
            "account" => self.route.id.to_string(),
            "kind" => err.error_kind()
        )
        .increment(1);
        error_response(err)
    }

    /// Log and count an upstream failure, then build the client response.
    pub fn upstream_failed(&self, err: &ProxyError, path: &str) -> Response {
        warn!(
            account_id = %self.route.id,
            path,
            kind = err.error_kind(),
            error = %err,
            "upstream request failed"
        );
        counter!(
            PROXY_UPSTREAM_ERRORS_TOTAL,
            "account" => self.route.id.to_string(),
            "kind" => err.error_kind()
        )
        .increment(1);
        error_response(err)
    }
}

/// Router for one account listener. Every path goes through [`dispatch`].
pub fn account_router(ctx: AccountContext) -> Router {
    Router::new().fallback(dispatch).with_state(ctx)
}

async fn dispatch(State(ctx): State<AccountContext>, req: Request) -> Response {
    let shape = ctx
        .rules
        .classify(req.method(), req.uri().path(), req.headers());
    counter!(
        PROXY_REQUESTS_TOTAL,
        "account" => ctx.route.id.to_string(),
        "route" => shape.label()
    )
    .increment(1);
    debug!(
        account_id = %ctx.route.id,
        method = %req.method(),
        path = req.uri().path(),
        route = shape.label(),
        "proxy request"
    );

    match shape {
        RequestShape::BlockedAsset => blocked_asset_response(),
        RequestShape::Upgrade => tunnel::upgrade(ctx, req).await,
        RequestShape::StreamRelay { stream_id } => relay::relay_stream(ctx, req, stream_id).await,
        RequestShape::InterceptedPost(kind) => intercept::relay_with_interception(ctx, req, kind).await,
        RequestShape::HtmlPage => inject::serve_page(ctx, req).await,
        RequestShape::Passthrough => transparent::forward(ctx, req).await,
    }
}

/// Client response for a proxy failure.
pub fn error_response(err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    let reason = status.canonical_reason().unwrap_or("Proxy Error");
    (status, format!("{reason}: {err}")).into_response()
}

/// Local answer for a blocked service-worker asset; never reaches the backend.
pub fn blocked_asset_response() -> Response {
    let mut response = Response::new(Body::from(BLOCKED_WORKER_BODY));
    let headers = response.headers_mut();
    let _ = headers.insert(
        CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/javascript; charset=utf-8"),
    );
    let _ = headers.insert(CACHE_CONTROL, axum::http::HeaderValue::from_static("no-store"));
    response
}

/// Path plus query of an inbound URI, defaulting to `/`.
pub fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map_or("/", |pq| pq.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_answer_bad_gateway() {
        let resp = error_response(&ProxyError::UpstreamUnreachable("refused".into()));
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn oversized_bodies_answer_413() {
        let resp = error_response(&ProxyError::PayloadTooLarge { limit: 8 });
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn blocked_asset_is_uncacheable_javascript() {
        let resp = blocked_asset_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "application/javascript; charset=utf-8"
        );
        assert_eq!(resp.headers().get(CACHE_CONTROL).unwrap(), "no-store");
    }

    #[test]
    fn path_and_query_keeps_query() {
        let uri: Uri = "http://localhost:5001/c/abc?x=1".parse().unwrap();
        assert_eq!(path_and_query(&uri), "/c/abc?x=1");
        let bare: Uri = "/".parse().unwrap();
        assert_eq!(path_and_query(&bare), "/");
    }
}
