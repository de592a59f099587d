//! Dashboard observer connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cuihub_core::ObserverId;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Why a message could not be queued for an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFailure {
    /// The bounded queue is full; the message was dropped.
    Full,
    /// The socket's writer is gone.
    Closed,
}

/// One connected dashboard socket, as seen by the hub.
///
/// The hub only holds the sending half of the socket's outbound queue; the
/// socket task owns the receiver and the transport.
pub struct ObserverConnection {
    /// Unique observer ID.
    pub id: ObserverId,
    tx: mpsc::Sender<Arc<String>>,
    connected_at: Instant,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ObserverConnection {
    /// Create an observer around its outbound queue.
    pub fn new(id: ObserverId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create an observer with a fresh queue of `capacity`, returning the
    /// receiving half.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(ObserverId::generate(), tx)), rx)
    }

    /// Queue a serialized event without waiting.
    pub fn send(&self, message: Arc<String>) -> Result<(), SendFailure> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendFailure::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendFailure::Closed),
        }
    }

    /// Whether the socket side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Total messages dropped for this observer.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a pong (or any other sign of life).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong (or since connecting).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_queues_message() {
        let (conn, mut rx) = ObserverConnection::channel(4);
        conn.send(Arc::new("hello".into())).unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (conn, _rx) = ObserverConnection::channel(1);
        conn.send(Arc::new("a".into())).unwrap();
        assert_eq!(conn.send(Arc::new("b".into())), Err(SendFailure::Full));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_queue_is_reported() {
        let (conn, rx) = ObserverConnection::channel(1);
        drop(rx);
        assert!(conn.is_closed());
        assert_eq!(conn.send(Arc::new("a".into())), Err(SendFailure::Closed));
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn mark_alive_resets_pong_clock() {
        let (conn, _rx) = ObserverConnection::channel(1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(conn.last_pong_elapsed() >= Duration::from_millis(20));
        conn.mark_alive();
        assert!(conn.last_pong_elapsed() < Duration::from_millis(20));
        assert!(conn.age() >= Duration::from_millis(20));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (conn, _rx) = ObserverConnection::channel(0);
        conn.send(Arc::new("a".into())).unwrap();
    }
}
