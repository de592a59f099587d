//! Observer liveness: evict sockets that stop answering pings.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ObserverConnection;

/// Why the heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No pong within the timeout.
    TimedOut,
    /// The socket's queue closed underneath us.
    Closed,
    /// Cancelled externally (socket finished or shutdown).
    Cancelled,
}

/// Watch an observer's pong clock.
///
/// Checked every `interval`; once the last pong is older than `timeout` the
/// observer is considered dead.
pub async fn run_heartbeat(
    connection: Arc<ObserverConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check = time::interval(interval.max(Duration::from_millis(1)));
    check.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let _ = check.tick().await;

    loop {
        tokio::select! {
            _ = check.tick() => {
                if connection.is_closed() {
                    return HeartbeatResult::Closed;
                }
                if connection.last_pong_elapsed() >= timeout {
                    return HeartbeatResult::TimedOut;
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_before_first_check() {
        let (conn, _rx) = ObserverConnection::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result =
            run_heartbeat(conn, Duration::from_secs(30), Duration::from_secs(90), cancel).await;
        assert_eq!(result, HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn silent_observer_times_out() {
        let (conn, _rx) = ObserverConnection::channel(4);
        let result = run_heartbeat(
            conn,
            Duration::from_millis(10),
            Duration::from_millis(30),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test]
    async fn closed_queue_stops_heartbeat() {
        let (conn, rx) = ObserverConnection::channel(4);
        drop(rx);
        let result = run_heartbeat(
            conn,
            Duration::from_millis(10),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::Closed);
    }

    #[tokio::test]
    async fn ponging_observer_stays_alive() {
        let (conn, _rx) = ObserverConnection::channel(4);
        let cancel = CancellationToken::new();
        let hb = tokio::spawn(run_heartbeat(
            Arc::clone(&conn),
            Duration::from_millis(10),
            Duration::from_millis(60),
            cancel.clone(),
        ));

        for _ in 0..10 {
            conn.mark_alive();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        assert!(!hb.is_finished());
        cancel.cancel();
        assert_eq!(hb.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
