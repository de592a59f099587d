//! Auto-sync: rebuild and restart when the source tree changes.
//!
//! A sync cycle publishes `cui-sync` events as it goes:
//! `started` → (install, build) → `built` | `error`. A successful cycle then
//! schedules a restart after a short delay so the `built` event reaches
//! observers before the process goes away. At most one cycle runs at a time;
//! triggers arriving mid-cycle are dropped.

pub mod debounce;
pub mod runner;
pub mod watcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cuihub_core::{HubEvent, ProxyError, SyncStatus};
use cuihub_settings::SyncSettings;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::runner::CommandRunner;
use crate::metrics::SYNC_CYCLES_TOTAL;
use crate::websocket::broadcast::BroadcastHub;

/// Result of one [`AutoSync::run_cycle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Install and build succeeded.
    Built,
    /// A step failed; the detail was published.
    Failed(String),
    /// Another cycle was already running.
    Skipped,
}

impl SyncOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Failed(_) => "error",
            Self::Skipped => "skipped",
        }
    }
}

/// Held for the duration of a cycle; clears the in-flight flag on drop.
pub struct SyncGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs sync cycles and schedules restarts.
pub struct AutoSync {
    hub: Arc<BroadcastHub>,
    runner: Arc<dyn CommandRunner>,
    root: PathBuf,
    install: String,
    build: String,
    restart: Option<String>,
    restart_delay: Duration,
    syncing: Arc<AtomicBool>,
    completed: AtomicU64,
    skipped: AtomicU64,
    shutdown: CancellationToken,
}

impl AutoSync {
    /// Create from settings.
    pub fn new(
        settings: &SyncSettings,
        hub: Arc<BroadcastHub>,
        runner: Arc<dyn CommandRunner>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            hub,
            runner,
            root: settings.root.clone(),
            install: settings.install_command.clone(),
            build: settings.build_command.clone(),
            restart: settings.restart().map(str::to_string),
            restart_delay: settings.restart_delay(),
            syncing: Arc::new(AtomicBool::new(false)),
            completed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Whether a cycle is in flight.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Cycles that ran to `built` or `error`.
    pub fn completed_cycles(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Triggers dropped because a cycle was in flight.
    pub fn skipped_cycles(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Claim the in-flight flag, or `None` when a cycle is already running.
    pub fn try_begin(&self) -> Option<SyncGuard> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard {
                flag: Arc::clone(&self.syncing),
            })
    }

    /// Run one cycle unless another is in flight.
    ///
    /// `auto` is echoed in every event so observers can tell file-triggered
    /// cycles from manual ones.
    pub async fn run_cycle(&self, auto: bool) -> SyncOutcome {
        let Some(guard) = self.try_begin() else {
            let _ = self.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(auto, "sync already in flight, skipping trigger");
            counter!(SYNC_CYCLES_TOTAL, "outcome" => SyncOutcome::Skipped.label()).increment(1);
            return SyncOutcome::Skipped;
        };
        self.run_guarded(guard, auto).await
    }

    /// Run one cycle with an already-claimed guard.
    pub async fn run_guarded(&self, guard: SyncGuard, auto: bool) -> SyncOutcome {
        let started = Instant::now();
        info!(auto, "sync started");
        self.publish(SyncStatus::Started, None, auto);

        let result = match self.step("install", &self.install).await {
            Ok(()) => self.step("build", &self.build).await,
            Err(e) => Err(e),
        };
        let _ = self.completed.fetch_add(1, Ordering::Relaxed);

        let outcome = match result {
            Ok(()) => {
                let secs = started.elapsed().as_secs_f64();
                info!(auto, elapsed_secs = secs, "sync built");
                self.publish(SyncStatus::Built, Some(format!("built in {secs:.1}s")), auto);
                if let Some(command) = &self.restart {
                    self.schedule_restart(command.clone(), auto);
                }
                SyncOutcome::Built
            }
            Err(e) => {
                warn!(auto, error = %e, "sync failed");
                let detail = e.to_string();
                self.publish(SyncStatus::Error, Some(detail.clone()), auto);
                SyncOutcome::Failed(detail)
            }
        };
        counter!(SYNC_CYCLES_TOTAL, "outcome" => outcome.label()).increment(1);
        drop(guard);
        outcome
    }

    async fn step(&self, name: &str, command: &str) -> Result<(), ProxyError> {
        if command.trim().is_empty() {
            debug!(step = name, "sync step not configured, skipping");
            return Ok(());
        }
        info!(step = name, command, "running sync step");
        let output = self
            .runner
            .run(command, &self.root, &self.shutdown)
            .await
            .map_err(|detail| ProxyError::WatcherBuildFailure {
                step: name.to_string(),
                detail,
            })?;
        if output.success() {
            debug!(step = name, duration_ms = output.duration_ms, "sync step succeeded");
            Ok(())
        } else {
            Err(ProxyError::WatcherBuildFailure {
                step: name.to_string(),
                detail: output.failure_detail(),
            })
        }
    }

    fn schedule_restart(&self, command: String, auto: bool) {
        let hub = Arc::clone(&self.hub);
        let runner = Arc::clone(&self.runner);
        let root = self.root.clone();
        let delay = self.restart_delay;
        let cancel = self.shutdown.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            info!(command = %command, "restarting after sync");
            let _ = hub.publish(&HubEvent::sync(SyncStatus::Restarting, None, auto));
            match runner.run(&command, &root, &cancel).await {
                Ok(out) if out.success() => debug!("restart command finished"),
                Ok(out) => {
                    let err = ProxyError::WatcherBuildFailure {
                        step: "restart".into(),
                        detail: out.failure_detail(),
                    };
                    warn!(error = %err, "restart failed");
                    let _ = hub.publish(&HubEvent::sync(SyncStatus::Error, Some(err.to_string()), auto));
                }
                Err(detail) => {
                    let err = ProxyError::WatcherBuildFailure {
                        step: "restart".into(),
                        detail,
                    };
                    warn!(error = %err, "restart failed");
                    let _ = hub.publish(&HubEvent::sync(SyncStatus::Error, Some(err.to_string()), auto));
                }
            }
        }));
    }

    fn publish(&self, status: SyncStatus, detail: Option<String>, auto: bool) {
        let _ = self.hub.publish(&HubEvent::sync(status, detail, auto));
    }
}
