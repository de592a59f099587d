//! Background stream monitors for intercepted POSTs.
//!
//! After a conversation start or message send, the backend streams the
//! assistant's reply on a separate `GET {stream_prefix}{id}`. The browser
//! may or may not be attached to that stream, so the hub opens its own
//! connection and watches it for completion.
//!
//! Every monitor runs under a watchdog deadline. When the deadline passes
//! the stream is torn down and the account is released with
//! `cui-response-ready` followed by `done`, so it never stays
//! `processing`. If the stream cannot be opened (or fails mid-way) a short
//! fallback timer publishes `cui-response-ready` instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::http::HeaderMap;
use cuihub_core::accounts::join_url;
use cuihub_core::detector::detect;
use cuihub_core::{AccountId, CuiState, HubEvent};
use futures::StreamExt;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{FALLBACKS_TOTAL, MONITORS_FINISHED_TOTAL, MONITORS_STARTED_TOTAL};
use crate::websocket::broadcast::BroadcastHub;

/// Identifies one backend stream to watch.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    /// Streaming id returned by the intercepted POST.
    pub streaming_id: String,
    /// Account the stream belongs to.
    pub account_id: AccountId,
    /// Backend origin.
    pub target_base_url: String,
    /// Cookie/authorization headers replayed from the original POST.
    pub auth_headers: HeaderMap,
}

/// How a monitor finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// A completion marker arrived.
    Completed,
    /// The stream ended without a marker.
    StreamEnded,
    /// The backend refused the stream; the fallback fired.
    RejectedStatus(u16),
    /// The stream could not be opened or broke; the fallback fired.
    Failed,
    /// The watchdog deadline passed.
    TimedOut,
    /// Shutdown cancelled the monitor.
    Cancelled,
}

impl MonitorOutcome {
    /// Short label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::StreamEnded => "stream_ended",
            Self::RejectedStatus(_) => "rejected",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Monitor timing.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Path prefix the stream is served under.
    pub stream_prefix: String,
    /// Watchdog deadline per monitor.
    pub timeout: Duration,
    /// Delay before the fallback `cui-response-ready` when the stream fails.
    pub fallback_delay: Duration,
}

/// Opens and watches backend streams.
pub struct StreamMonitor {
    client: reqwest::Client,
    hub: Arc<BroadcastHub>,
    config: MonitorConfig,
    active: AtomicUsize,
}

/// Why a stream read stopped before the watchdog fired.
enum StreamEnd {
    Marker,
    Eof,
    Rejected(u16),
    Broken,
}

impl StreamMonitor {
    /// Create a monitor sharing the proxy's upstream client.
    pub fn new(client: reqwest::Client, hub: Arc<BroadcastHub>, config: MonitorConfig) -> Self {
        Self {
            client,
            hub,
            config,
            active: AtomicUsize::new(0),
        }
    }

    /// Monitors currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Watch one stream to completion, timeout, or cancellation.
    pub async fn run(&self, handle: StreamHandle, cancel: CancellationToken) -> MonitorOutcome {
        let _ = self.active.fetch_add(1, Ordering::Relaxed);
        counter!(MONITORS_STARTED_TOTAL, "account" => handle.account_id.to_string()).increment(1);
        info!(
            account_id = %handle.account_id,
            streaming_id = %handle.streaming_id,
            "stream monitor started"
        );

        let outcome = self.watch(&handle, &cancel).await;

        let _ = self.active.fetch_sub(1, Ordering::Relaxed);
        counter!(
            MONITORS_FINISHED_TOTAL,
            "account" => handle.account_id.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
        info!(
            account_id = %handle.account_id,
            streaming_id = %handle.streaming_id,
            outcome = outcome.label(),
            "stream monitor finished"
        );
        outcome
    }

    async fn watch(&self, handle: &StreamHandle, cancel: &CancellationToken) -> MonitorOutcome {
        let deadline = Instant::now() + self.config.timeout;
        let read = tokio::select! {
            () = cancel.cancelled() => return MonitorOutcome::Cancelled,
            res = tokio::time::timeout_at(deadline, self.read_stream(handle)) => res,
        };

        let end = match read {
            Ok(end) => end,
            Err(_) => {
                warn!(
                    account_id = %handle.account_id,
                    streaming_id = %handle.streaming_id,
                    timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
                    "stream monitor timed out"
                );
                self.publish_completion(&handle.account_id);
                return MonitorOutcome::TimedOut;
            }
        };

        let outcome = match end {
            StreamEnd::Marker => MonitorOutcome::Completed,
            StreamEnd::Eof => MonitorOutcome::StreamEnded,
            StreamEnd::Rejected(status) => MonitorOutcome::RejectedStatus(status),
            StreamEnd::Broken => MonitorOutcome::Failed,
        };
        match outcome {
            MonitorOutcome::Completed | MonitorOutcome::StreamEnded => {
                self.publish_completion(&handle.account_id);
            }
            _ => {
                let fired = fallback_after(
                    &self.hub,
                    &handle.account_id,
                    self.config.fallback_delay,
                    cancel,
                    outcome.label(),
                )
                .await;
                if !fired {
                    return MonitorOutcome::Cancelled;
                }
            }
        }
        outcome
    }

    async fn read_stream(&self, handle: &StreamHandle) -> StreamEnd {
        let url = join_url(
            &handle.target_base_url,
            &format!("{}{}", self.config.stream_prefix, handle.streaming_id),
        );
        let resp = match self
            .client
            .get(&url)
            .headers(handle.auth_headers.clone())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(account_id = %handle.account_id, url = %url, error = %e, "stream monitor connect failed");
                return StreamEnd::Broken;
            }
        };
        if !resp.status().is_success() {
            warn!(
                account_id = %handle.account_id,
                status = resp.status().as_u16(),
                "stream monitor rejected"
            );
            return StreamEnd::Rejected(resp.status().as_u16());
        }

        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) if detect(&chunk) => {
                    debug!(account_id = %handle.account_id, "completion marker seen by monitor");
                    return StreamEnd::Marker;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(account_id = %handle.account_id, error = %e, "stream monitor read failed");
                    return StreamEnd::Broken;
                }
            }
        }
        StreamEnd::Eof
    }

    fn publish_completion(&self, account: &AccountId) {
        let _ = self.hub.publish(&HubEvent::response_ready(account.clone()));
        let _ = self.hub.publish(&HubEvent::state(account.clone(), CuiState::Done));
    }
}

/// Sleep `delay` then publish `cui-response-ready`, unless cancelled first.
///
/// Returns whether the event was published.
pub async fn fallback_after(
    hub: &BroadcastHub,
    account: &AccountId,
    delay: Duration,
    cancel: &CancellationToken,
    reason: &'static str,
) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => {
            debug!(account_id = %account, reason, "fallback response-ready");
            counter!(FALLBACKS_TOTAL, "account" => account.to_string(), "reason" => reason).increment(1);
            let _ = hub.publish(&HubEvent::response_ready(account.clone()));
            true
        }
    }
}

/// [`fallback_after`] on its own task.
pub fn spawn_fallback(
    hub: Arc<BroadcastHub>,
    account: AccountId,
    delay: Duration,
    cancel: CancellationToken,
    reason: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = fallback_after(&hub, &account, delay, &cancel, reason).await;
    })
}

/// Launches monitors. The proxy only needs to hand over a handle.
pub trait MonitorSpawner: Send + Sync {
    /// Start watching `handle` in the background.
    fn spawn(&self, handle: StreamHandle);
}

/// Runs each monitor as its own tokio task, cancelled on shutdown.
pub struct TaskSpawner {
    monitor: Arc<StreamMonitor>,
    shutdown: CancellationToken,
}

impl TaskSpawner {
    /// Spawner for `monitor`, cancelled by `shutdown`.
    pub fn new(monitor: Arc<StreamMonitor>, shutdown: CancellationToken) -> Self {
        Self { monitor, shutdown }
    }

    /// The underlying monitor.
    pub fn monitor(&self) -> &Arc<StreamMonitor> {
        &self.monitor
    }
}

impl MonitorSpawner for TaskSpawner {
    fn spawn(&self, handle: StreamHandle) {
        let monitor = Arc::clone(&self.monitor);
        let cancel = self.shutdown.child_token();
        drop(tokio::spawn(async move {
            let _ = monitor.run(handle, cancel).await;
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ObserverConnection;
    use assert_matches::assert_matches;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(timeout: Duration, fallback: Duration) -> MonitorConfig {
        MonitorConfig {
            stream_prefix: "/api/stream/".into(),
            timeout,
            fallback_delay: fallback,
        }
    }

    fn setup(
        cfg: MonitorConfig,
    ) -> (StreamMonitor, Arc<BroadcastHub>, tokio::sync::mpsc::Receiver<Arc<String>>) {
        let hub = Arc::new(BroadcastHub::new());
        let (conn, rx) = ObserverConnection::channel(64);
        hub.register(conn);
        let monitor = StreamMonitor::new(reqwest::Client::new(), Arc::clone(&hub), cfg);
        (monitor, hub, rx)
    }

    fn handle(base: &str) -> StreamHandle {
        let mut auth = HeaderMap::new();
        let _ = auth.insert("cookie", "sid=42".parse().unwrap());
        StreamHandle {
            streaming_id: "s-1".into(),
            account_id: AccountId::from("acct"),
            target_base_url: base.to_string(),
            auth_headers: auth,
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<Arc<String>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
            let kind = v["type"].as_str().unwrap().to_string();
            match v["state"].as_str() {
                Some(state) => out.push(format!("{kind}:{state}")),
                None => out.push(kind),
            }
        }
        out
    }

    #[tokio::test]
    async fn marker_publishes_ready_then_done() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stream/s-1"))
            .and(header("cookie", "sid=42"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: {\"type\":\"assistant\"}\n\ndata: {\"type\":\"result\"}\n\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (monitor, _hub, mut rx) = setup(config(Duration::from_secs(5), Duration::from_millis(10)));
        let outcome = monitor.run(handle(&server.uri()), CancellationToken::new()).await;
        assert_eq!(outcome, MonitorOutcome::Completed);
        assert_eq!(drain(&mut rx), vec!["cui-response-ready", "cui-state:done"]);
        assert_eq!(monitor.active(), 0);
    }

    #[tokio::test]
    async fn end_of_stream_counts_as_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stream/s-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("data: {\"type\":\"assistant\"}\n\n"))
            .mount(&server)
            .await;

        let (monitor, hub, mut rx) = setup(config(Duration::from_secs(5), Duration::from_millis(10)));
        let outcome = monitor.run(handle(&server.uri()), CancellationToken::new()).await;
        assert_eq!(outcome, MonitorOutcome::StreamEnded);
        assert_eq!(drain(&mut rx), vec!["cui-response-ready", "cui-state:done"]);
        assert_eq!(hub.state_of(&AccountId::from("acct")), Some(CuiState::Done));
    }

    #[tokio::test]
    async fn rejected_stream_falls_back_to_response_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stream/s-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (monitor, _hub, mut rx) = setup(config(Duration::from_secs(5), Duration::from_millis(20)));
        let outcome = monitor.run(handle(&server.uri()), CancellationToken::new()).await;
        assert_matches!(outcome, MonitorOutcome::RejectedStatus(404));
        assert_eq!(drain(&mut rx), vec!["cui-response-ready"]);
    }

    #[tokio::test]
    async fn unreachable_backend_falls_back() {
        let (monitor, _hub, mut rx) = setup(config(Duration::from_secs(5), Duration::from_millis(20)));
        let outcome = monitor
            .run(handle("http://127.0.0.1:1"), CancellationToken::new())
            .await;
        assert_eq!(outcome, MonitorOutcome::Failed);
        assert_eq!(drain(&mut rx), vec!["cui-response-ready"]);
    }

    #[tokio::test]
    async fn watchdog_expiry_releases_processing_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stream/s-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("data: {}\n\n")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let (monitor, hub, mut rx) =
            setup(config(Duration::from_millis(100), Duration::from_millis(10)));
        let account = AccountId::from("acct");
        let _ = hub.publish(&HubEvent::state(account.clone(), CuiState::Processing));
        let _ = drain(&mut rx);

        let outcome = monitor.run(handle(&server.uri()), CancellationToken::new()).await;
        assert_eq!(outcome, MonitorOutcome::TimedOut);
        assert_eq!(drain(&mut rx), vec!["cui-response-ready", "cui-state:done"]);
        assert_eq!(hub.state_of(&account), Some(CuiState::Done));
    }

    #[tokio::test]
    async fn cancellation_stops_fallback() {
        let (monitor, _hub, mut rx) =
            setup(config(Duration::from_secs(5), Duration::from_secs(30)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let outcome = monitor.run(handle("http://127.0.0.1:1"), cancel).await;
        task.await.unwrap();
        assert_eq!(outcome, MonitorOutcome::Cancelled);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_fallback_fires_after_delay() {
        let hub = Arc::new(BroadcastHub::new());
        let (conn, mut rx) = ObserverConnection::channel(8);
        hub.register(conn);
        let task = spawn_fallback(
            Arc::clone(&hub),
            AccountId::from("acct"),
            Duration::from_secs(10),
            CancellationToken::new(),
            "no_streaming_id",
        );
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(drain(&mut rx).is_empty());
        task.await.unwrap();
        assert_eq!(drain(&mut rx), vec!["cui-response-ready"]);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(MonitorOutcome::Completed.label(), "completed");
        assert_eq!(MonitorOutcome::RejectedStatus(500).label(), "rejected");
    }
}
