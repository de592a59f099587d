//! # cuihub
//!
//! Hub binary: loads settings, starts one proxy listener per account, the
//! source watcher, and the dashboard server, then waits for ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cuihub_server::manager::ProxyManager;
use cuihub_server::server::DashboardServer;
use cuihub_server::shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, ShutdownCoordinator};
use cuihub_server::sync::AutoSync;
use cuihub_server::sync::debounce::run_debounce;
use cuihub_server::sync::runner::ShellRunner;
use cuihub_server::sync::watcher::spawn_watcher;
use cuihub_server::websocket::broadcast::BroadcastHub;
use cuihub_server::websocket::handler::ObserverConfig;
use cuihub_settings::HubSettings;
use cuihub_telemetry::{TelemetryConfig, init_telemetry};
use tokio::sync::mpsc;

/// Pending triggers between the watcher and the debounce loop.
const TRIGGER_QUEUE: usize = 64;

/// Multi-account CUI proxy hub.
#[derive(Parser, Debug)]
#[command(name = "cuihub", about = "Multi-account CUI proxy hub")]
struct Cli {
    /// Settings file (defaults to `~/.cuihub/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dashboard host (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Dashboard port (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Disable the source watcher and auto-sync.
    #[arg(long)]
    no_sync: bool,
}

impl Cli {
    fn apply(&self, settings: &mut HubSettings) {
        if let Some(host) = &self.host {
            settings.dashboard.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.dashboard.port = port;
        }
        if self.no_sync {
            settings.sync.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.config {
        Some(path) => cuihub_settings::load_settings_from_path(path),
        None => cuihub_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    let telemetry = TelemetryConfig::from_levels(
        &settings.logging.level,
        settings
            .logging
            .modules
            .iter()
            .map(|(m, l)| (m.as_str(), l.as_str())),
        settings.logging.json,
    );
    init_telemetry(&telemetry).context("Failed to initialize logging")?;

    let metrics = match cuihub_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let shutdown = ShutdownCoordinator::new();
    let hub = Arc::new(BroadcastHub::with_accounts(
        settings.accounts.iter().map(|a| &a.id),
    ));

    // Account listeners
    let manager = ProxyManager::new(
        &settings.accounts,
        &settings.proxy,
        Arc::clone(&hub),
        shutdown.token(),
    )
    .context("Failed to build proxy")?;
    let listeners = manager
        .start(&settings.dashboard.host)
        .await
        .context("Failed to bind account listeners")?;
    for listener in listeners {
        shutdown.track(format!("proxy:{}", listener.account), listener.handle);
    }

    // Auto-sync
    let sync = Arc::new(AutoSync::new(
        &settings.sync,
        Arc::clone(&hub),
        Arc::new(ShellRunner),
        shutdown.token(),
    ));
    let _watcher = if settings.sync.enabled {
        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
        match spawn_watcher(&settings.sync, Arc::clone(&hub), tx, shutdown.token()) {
            Ok(watcher) => {
                shutdown.track(
                    "sync:debounce",
                    tokio::spawn(run_debounce(
                        rx,
                        settings.sync.debounce(),
                        Arc::clone(&sync),
                        shutdown.token(),
                    )),
                );
                Some(watcher)
            }
            Err(e) => {
                tracing::warn!(error = %e, "source watcher failed to start, auto-sync disabled");
                None
            }
        }
    } else {
        tracing::info!("auto-sync disabled");
        None
    };

    // Dashboard
    let server = DashboardServer::new(
        Arc::clone(&hub),
        ObserverConfig::from(&settings.dashboard),
        shutdown.token(),
    )
    .with_accounts(settings.accounts.len())
    .with_sync(sync)
    .with_metrics(metrics);
    let (addr, handle) = server
        .listen(&settings.dashboard.host, settings.dashboard.port)
        .await
        .context("Failed to bind dashboard")?;
    shutdown.track("dashboard", handle);

    tracing::info!(
        accounts = settings.accounts.len(),
        "cuihub dashboard listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let report = shutdown.drain(DEFAULT_SHUTDOWN_TIMEOUT).await;
    tracing::info!(
        completed = report.completed.len(),
        aborted = report.aborted.len(),
        "Shutdown complete"
    );
    Ok(())
}
