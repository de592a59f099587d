//! Event fan-out to dashboard observers and the per-account state table.

use std::collections::HashMap;
use std::sync::Arc;

use cuihub_core::{AccountId, AccountState, CuiState, HubEvent, ObserverId};
use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::connection::{ObserverConnection, SendFailure};
use crate::metrics::{HUB_PUBLISH_TOTAL, WS_BROADCAST_DROPS_TOTAL, WS_OBSERVER_EVICTIONS_TOTAL};

/// Observers whose cumulative drop count reaches this are evicted.
const MAX_TOTAL_DROPS: u64 = 100;

/// Outcome of one [`BroadcastHub::publish`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Observers the event was queued for.
    pub delivered: usize,
    /// Observers whose queue was full.
    pub dropped: usize,
    /// Observers removed after this publish.
    pub evicted: usize,
}

impl PublishReport {
    /// Delivery attempts made (one per registered observer).
    pub fn attempts(&self) -> usize {
        self.delivered + self.dropped + self.evicted
    }
}

/// Observer registry plus last-known [`AccountState`] per account.
///
/// Publishing never fails and never blocks: each observer has its own bounded
/// queue and a slow or dead observer only loses its own copy.
pub struct BroadcastHub {
    observers: RwLock<HashMap<ObserverId, Arc<ObserverConnection>>>,
    states: RwLock<HashMap<AccountId, AccountState>>,
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Create a hub seeded with `idle` for every account.
    pub fn with_accounts<'a>(accounts: impl IntoIterator<Item = &'a AccountId>) -> Self {
        let hub = Self::new();
        {
            let mut states = hub.states.write();
            for id in accounts {
                let _ = states.insert(id.clone(), AccountState::now(id.clone(), CuiState::Idle));
            }
        }
        hub
    }

    /// Register an observer and queue the current state of every account
    /// for it.
    ///
    /// The state table stays read-locked until the observer is in the
    /// registry, so a concurrent state publish is either part of the snapshot
    /// or fanned out to the new observer (possibly both, never neither).
    pub fn register(&self, observer: Arc<ObserverConnection>) {
        let states = self.states.read();
        let mut snapshot: Vec<&AccountState> = states.values().collect();
        snapshot.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        for state in snapshot {
            if let Some(json) = serialize(&state.to_event()) {
                let _ = observer.send(json);
            }
        }
        let id = observer.id.clone();
        let _ = self.observers.write().insert(id.clone(), observer);
        drop(states);
        debug!(observer_id = %id, "observer registered");
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unregister(&self, id: &ObserverId) {
        if self.observers.write().remove(id).is_some() {
            debug!(observer_id = %id, "observer unregistered");
        }
    }

    /// Publish an event to every observer.
    ///
    /// State events update the state table first, even with no observers.
    pub fn publish(&self, event: &HubEvent) -> PublishReport {
        if let Some((account, state)) = event.as_state() {
            let _ = self
                .states
                .write()
                .insert(account.clone(), AccountState::now(account.clone(), state));
        }
        counter!(HUB_PUBLISH_TOTAL, "type" => event.event_type()).increment(1);

        let Some(json) = serialize(event) else {
            return PublishReport::default();
        };

        let recipients: Vec<Arc<ObserverConnection>> =
            self.observers.read().values().cloned().collect();
        trace!(event_type = event.event_type(), recipients = recipients.len(), "publish");

        let mut report = PublishReport::default();
        let mut evict = Vec::new();
        for conn in &recipients {
            match conn.send(Arc::clone(&json)) {
                Ok(()) => report.delivered += 1,
                Err(SendFailure::Full) => {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    if conn.drop_count() >= MAX_TOTAL_DROPS {
                        warn!(
                            observer_id = %conn.id,
                            drops = conn.drop_count(),
                            "observer exceeded drop limit, evicting"
                        );
                        evict.push(conn.id.clone());
                    } else {
                        report.dropped += 1;
                    }
                }
                Err(SendFailure::Closed) => {
                    debug!(observer_id = %conn.id, "observer closed, evicting");
                    evict.push(conn.id.clone());
                }
            }
        }

        if !evict.is_empty() {
            let mut observers = self.observers.write();
            for id in &evict {
                let _ = observers.remove(id);
            }
            counter!(WS_OBSERVER_EVICTIONS_TOTAL).increment(evict.len() as u64);
            report.evicted = evict.len();
        }
        report
    }

    /// Last known state of one account.
    pub fn state_of(&self, account: &AccountId) -> Option<CuiState> {
        self.states.read().get(account).map(|s| s.state)
    }

    /// Last known state of every account, sorted by account id.
    pub fn states(&self) -> Vec<AccountState> {
        let mut all: Vec<AccountState> = self.states.read().values().cloned().collect();
        all.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        all
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize(event: &HubEvent) -> Option<Arc<String>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
            None
        }
    }
}
