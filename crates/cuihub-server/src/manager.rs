//! The account proxy set: one listener per configured account.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use cuihub_core::{AccountId, AccountRoute, ProxyError};
use cuihub_settings::ProxySettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::monitor::{MonitorConfig, MonitorSpawner, StreamMonitor, TaskSpawner};
use crate::proxy::classify::RouteRules;
use crate::proxy::{AccountContext, account_router};
use crate::websocket::broadcast::BroadcastHub;

/// A bound, serving account listener.
#[derive(Debug)]
pub struct RunningListener {
    /// Account served.
    pub account: AccountId,
    /// Bound address.
    pub addr: SocketAddr,
    /// Serve task; finishes after shutdown.
    pub handle: JoinHandle<()>,
}

/// Owns the route table and everything the listeners share: the upstream
/// client, the hub, the monitor spawner and the shutdown token.
pub struct ProxyManager {
    routes: Vec<Arc<AccountRoute>>,
    hub: Arc<BroadcastHub>,
    client: reqwest::Client,
    settings: Arc<ProxySettings>,
    rules: Arc<RouteRules>,
    monitor: Arc<StreamMonitor>,
    monitors: Arc<dyn MonitorSpawner>,
    shutdown: CancellationToken,
}

impl ProxyManager {
    /// Build the proxy set for `accounts`.
    pub fn new(
        accounts: &[AccountRoute],
        settings: &ProxySettings,
        hub: Arc<BroadcastHub>,
        shutdown: CancellationToken,
    ) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::ClientSetup(e.to_string()))?;

        let monitor = Arc::new(StreamMonitor::new(
            client.clone(),
            Arc::clone(&hub),
            MonitorConfig {
                stream_prefix: settings.stream_prefix.clone(),
                timeout: settings.monitor_timeout(),
                fallback_delay: settings.monitor_fallback(),
            },
        ));
        let monitors: Arc<dyn MonitorSpawner> =
            Arc::new(TaskSpawner::new(Arc::clone(&monitor), shutdown.clone()));

        Ok(Self {
            routes: accounts.iter().cloned().map(Arc::new).collect(),
            hub,
            client,
            settings: Arc::new(settings.clone()),
            rules: Arc::new(RouteRules {
                stream_prefix: settings.stream_prefix.clone(),
                blocked_paths: settings.blocked_paths.clone(),
            }),
            monitor,
            monitors,
            shutdown,
        })
    }

    /// Replace the monitor spawner.
    #[must_use]
    pub fn with_monitor_spawner(mut self, spawner: Arc<dyn MonitorSpawner>) -> Self {
        self.monitors = spawner;
        self
    }

    /// Configured routes.
    pub fn routes(&self) -> &[Arc<AccountRoute>] {
        &self.routes
    }

    /// The hub state events go to.
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Monitors currently running under the default spawner.
    pub fn active_monitors(&self) -> usize {
        self.monitor.active()
    }

    /// Handler context for one route.
    pub fn context(&self, route: &Arc<AccountRoute>) -> AccountContext {
        AccountContext {
            route: Arc::clone(route),
            hub: Arc::clone(&self.hub),
            client: self.client.clone(),
            settings: Arc::clone(&self.settings),
            rules: Arc::clone(&self.rules),
            monitors: Arc::clone(&self.monitors),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Router for one route.
    pub fn router(&self, route: &Arc<AccountRoute>) -> Router {
        account_router(self.context(route))
    }

    /// Serve `route` on an already-bound listener until shutdown.
    pub fn serve_on(&self, route: &Arc<AccountRoute>, listener: TcpListener) -> std::io::Result<RunningListener> {
        let addr = listener.local_addr()?;
        let router = self.router(route);
        let account = route.id.clone();
        let shutdown = self.shutdown.clone();
        let task_account = account.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            match result {
                Ok(()) => info!(account_id = %task_account, "account listener stopped"),
                Err(e) => error!(account_id = %task_account, error = %e, "account listener failed"),
            }
        });
        info!(account_id = %account, addr = %addr, upstream = route.base(), "account listener started");
        Ok(RunningListener { account, addr, handle })
    }

    /// Bind every route's configured port on `host` and start serving.
    ///
    /// Fails on the first port that cannot be bound; listeners already
    /// started keep running until shutdown.
    pub async fn start(&self, host: &str) -> std::io::Result<Vec<RunningListener>> {
        let mut running = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            let listener = TcpListener::bind((host, route.local_port)).await.map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("bind {host}:{} for account {}: {e}", route.local_port, route.id),
                )
            })?;
            running.push(self.serve_on(route, listener)?);
        }
        Ok(running)
    }
}
