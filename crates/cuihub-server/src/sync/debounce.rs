//! Trailing-edge debounce between file changes and sync cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::AutoSync;

/// Start a cycle once `window` passes with no new trigger.
///
/// Every trigger re-arms the timer. Cycles run on their own task so the
/// loop keeps draining triggers during a build; those later firings are
/// dropped by the in-flight guard.
pub async fn run_debounce(
    mut triggers: mpsc::Receiver<()>,
    window: Duration,
    sync: Arc<AutoSync>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            trigger = triggers.recv() => if trigger.is_none() { return },
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(window) => break,
                trigger = triggers.recv() => if trigger.is_none() { return },
            }
        }

        debug!(window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX), "debounce elapsed");
        let sync = Arc::clone(&sync);
        drop(tokio::spawn(async move {
            let outcome = sync.run_cycle(true).await;
            debug!(?outcome, "auto sync cycle finished");
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::FakeRunner;
    use crate::websocket::broadcast::BroadcastHub;
    use cuihub_settings::SyncSettings;

    const WINDOW: Duration = Duration::from_secs(3);

    fn start(runner: Arc<FakeRunner>) -> (mpsc::Sender<()>, Arc<AutoSync>, CancellationToken) {
        let settings = SyncSettings {
            install_command: "install".into(),
            build_command: "build".into(),
            restart_command: None,
            ..SyncSettings::default()
        };
        let cancel = CancellationToken::new();
        let sync = Arc::new(AutoSync::new(
            &settings,
            Arc::new(BroadcastHub::new()),
            runner,
            cancel.clone(),
        ));
        let (tx, rx) = mpsc::channel(16);
        drop(tokio::spawn(run_debounce(rx, WINDOW, Arc::clone(&sync), cancel.clone())));
        (tx, sync, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_cycle() {
        let runner = Arc::new(FakeRunner::default());
        let (tx, sync, _cancel) = start(Arc::clone(&runner));
        for _ in 0..5 {
            tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(sync.completed_cycles(), 0, "still inside the quiet window");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sync.completed_cycles(), 1);
        assert_eq!(runner.calls(), vec!["install", "build"]);
    }

    #[tokio::test(start_paused = true)]
    async fn separated_changes_run_separately() {
        let runner = Arc::new(FakeRunner::default());
        let (tx, sync, _cancel) = start(runner);
        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sync.completed_cycles(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn firing_during_build_is_skipped() {
        let runner = FakeRunner::slow(Duration::from_secs(10));
        let (tx, sync, _cancel) = start(Arc::clone(&runner));
        tx.send(()).await.unwrap();
        // Cycle starts at 3s; install runs until 13s.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(sync.is_syncing());
        tx.send(()).await.unwrap();
        // Second debounce fires at 8s, mid-install.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sync.skipped_cycles(), 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sync.completed_cycles(), 1);
        assert!(!sync.is_syncing());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_pending_debounce() {
        let runner = Arc::new(FakeRunner::default());
        let (tx, sync, cancel) = start(Arc::clone(&runner));
        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sync.completed_cycles(), 0);
        assert!(runner.calls().is_empty());
    }
}
