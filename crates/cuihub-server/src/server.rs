//! `DashboardServer`: the observer WebSocket plus a small HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use cuihub_core::AccountState;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::health::{self, HealthResponse};
use crate::sync::AutoSync;
use crate::websocket::broadcast::BroadcastHub;
use crate::websocket::handler::{ObserverConfig, serve_observer};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct DashboardState {
    /// Event fan-out and state table.
    pub hub: Arc<BroadcastHub>,
    /// Manual sync trigger, when auto-sync is configured.
    pub sync: Option<Arc<AutoSync>>,
    /// Observer socket tuning.
    pub observer: ObserverConfig,
    /// Closes observer sockets on shutdown.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Configured account count.
    pub accounts: usize,
    /// Renders `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// `GET /api/cui-states` body.
#[derive(Debug, Serialize)]
pub struct StatesResponse {
    /// Last known state per account, sorted by id.
    pub states: Vec<AccountState>,
}

/// The dashboard server.
pub struct DashboardServer {
    state: DashboardState,
}

impl DashboardServer {
    /// Create a server publishing from `hub`.
    pub fn new(hub: Arc<BroadcastHub>, observer: ObserverConfig, shutdown: CancellationToken) -> Self {
        Self {
            state: DashboardState {
                hub,
                sync: None,
                observer,
                shutdown,
                start_time: Instant::now(),
                accounts: 0,
                metrics: None,
            },
        }
    }

    /// Enable `POST /api/sync`.
    #[must_use]
    pub fn with_sync(mut self, sync: Arc<AutoSync>) -> Self {
        self.state.sync = Some(sync);
        self
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.state.metrics = handle;
        self
    }

    /// Report `accounts` in `/health`.
    #[must_use]
    pub fn with_accounts(mut self, accounts: usize) -> Self {
        self.state.accounts = accounts;
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/api/cui-states", get(states_handler))
            .route("/api/sync", post(sync_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind `host:port` and serve until shutdown.
    pub async fn listen(&self, host: &str, port: u16) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((host, port)).await?;
        self.serve_on(listener)
    }

    /// Serve on an already-bound listener until shutdown.
    pub fn serve_on(&self, listener: TcpListener) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = listener.local_addr()?;
        let router = self.router();
        let shutdown = self.state.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %e, "dashboard server failed");
            }
            info!("dashboard server stopped");
        });
        info!(addr = %addr, "dashboard listening");
        Ok((addr, handle))
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<DashboardState>) -> Response {
    let hub = Arc::clone(&state.hub);
    let config = state.observer;
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| serve_observer(socket, hub, config, shutdown))
}

/// GET /health
async fn health_handler(State(state): State<DashboardState>) -> Json<HealthResponse> {
    let syncing = state.sync.as_ref().is_some_and(|s| s.is_syncing());
    Json(health::health_check(
        state.start_time,
        &state.hub,
        state.accounts,
        syncing,
    ))
}

/// GET /api/cui-states
async fn states_handler(State(state): State<DashboardState>) -> Json<StatesResponse> {
    Json(StatesResponse {
        states: state.hub.states(),
    })
}

/// POST /api/sync: start a manual cycle.
async fn sync_handler(State(state): State<DashboardState>) -> Response {
    let Some(sync) = state.sync else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "sync not configured" })),
        )
            .into_response();
    };
    let Some(guard) = sync.try_begin() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "sync already in progress" })),
        )
            .into_response();
    };
    drop(tokio::spawn(async move {
        let _ = sync.run_guarded(guard, false).await;
    }));
    (StatusCode::ACCEPTED, Json(json!({ "status": "started" }))).into_response()
}

/// GET /metrics
async fn metrics_handler(State(state): State<DashboardState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::FakeRunner;
    use axum::body::Body;
    use axum::http::Request;
    use cuihub_core::{AccountId, CuiState, HubEvent};
    use cuihub_settings::SyncSettings;
    use tower::ServiceExt;

    fn hub() -> Arc<BroadcastHub> {
        let ids = [AccountId::from("beta"), AccountId::from("alpha")];
        Arc::new(BroadcastHub::with_accounts(ids.iter()))
    }

    fn server() -> DashboardServer {
        DashboardServer::new(hub(), ObserverConfig::default(), CancellationToken::new()).with_accounts(2)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let resp = server().router().oneshot(request("GET", "/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["accounts"], 2);
        assert_eq!(parsed["observers"], 0);
        assert_eq!(parsed["syncing"], false);
    }

    #[tokio::test]
    async fn states_are_sorted_and_current() {
        let s = server();
        let _ = s
            .state
            .hub
            .publish(&HubEvent::state(AccountId::from("beta"), CuiState::Processing));
        let resp = s.router().oneshot(request("GET", "/api/cui-states")).await.unwrap();
        let parsed = body_json(resp).await;
        let states = parsed["states"].as_array().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0]["accountId"], "alpha");
        assert_eq!(states[0]["state"], "idle");
        assert_eq!(states[1]["state"], "processing");
    }

    #[tokio::test]
    async fn sync_without_watcher_is_unavailable() {
        let resp = server().router().oneshot(request("POST", "/api/sync")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn sync_conflicts_while_in_flight() {
        let h = hub();
        let sync = Arc::new(AutoSync::new(
            &SyncSettings::default(),
            Arc::clone(&h),
            Arc::new(FakeRunner::default()),
            CancellationToken::new(),
        ));
        let s = DashboardServer::new(h, ObserverConfig::default(), CancellationToken::new())
            .with_sync(Arc::clone(&sync));

        let guard = sync.try_begin().unwrap();
        let resp = s.router().oneshot(request("POST", "/api/sync")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        drop(guard);

        let resp = s.router().oneshot(request("POST", "/api/sync")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["status"], "started");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let resp = server().router().oneshot(request("GET", "/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let resp = server().router().oneshot(request("GET", "/nonexistent")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
