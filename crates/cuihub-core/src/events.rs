//! Events fanned out to dashboard observers.
//!
//! Wire format is JSON tagged by `type`:
//!
//! ```json
//! {"type":"cui-state","cuiId":"rafael","state":"processing"}
//! {"type":"cui-response-ready","cuiId":"rafael"}
//! {"type":"cui-sync","status":"built","auto":true}
//! {"type":"file-change","path":"src/main.rs","event":"change"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AccountId;

/// Per-account activity state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CuiState {
    /// Nothing in flight.
    Idle,
    /// A generation was started or a stream produced data.
    Processing,
    /// The last generation finished (or failed).
    Done,
}

impl CuiState {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Done => "done",
        }
    }
}

/// Auto-sync progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Install + build started.
    Started,
    /// Build finished successfully.
    Built,
    /// Install or build failed.
    Error,
    /// The restart command is about to run.
    Restarting,
}

/// Kind of filesystem change reported by the watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    /// File created.
    Add,
    /// File modified.
    Change,
    /// File removed.
    Unlink,
}

/// One broadcast event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    /// Account state transition.
    #[serde(rename = "cui-state", rename_all = "camelCase")]
    CuiState {
        /// Account the state belongs to.
        cui_id: AccountId,
        /// New state.
        state: CuiState,
    },
    /// A response finished generating (or a fallback fired).
    #[serde(rename = "cui-response-ready", rename_all = "camelCase")]
    ResponseReady {
        /// Account the response belongs to.
        cui_id: AccountId,
    },
    /// Auto-sync progress.
    #[serde(rename = "cui-sync")]
    Sync {
        /// Progress step.
        status: SyncStatus,
        /// Error text or build summary.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        /// `true` when triggered by the file watcher, `false` when manual.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto: Option<bool>,
    },
    /// A watched source file changed.
    #[serde(rename = "file-change")]
    FileChange {
        /// Path relative to the sync root.
        path: String,
        /// Change kind.
        event: FileChangeKind,
    },
}

impl HubEvent {
    /// `cui-state` event.
    pub fn state(cui_id: AccountId, state: CuiState) -> Self {
        Self::CuiState { cui_id, state }
    }

    /// `cui-response-ready` event.
    pub fn response_ready(cui_id: AccountId) -> Self {
        Self::ResponseReady { cui_id }
    }

    /// `cui-sync` event.
    pub fn sync(status: SyncStatus, detail: Option<String>, auto: bool) -> Self {
        Self::Sync {
            status,
            detail,
            auto: Some(auto),
        }
    }

    /// The `type` tag as it appears on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CuiState { .. } => "cui-state",
            Self::ResponseReady { .. } => "cui-response-ready",
            Self::Sync { .. } => "cui-sync",
            Self::FileChange { .. } => "file-change",
        }
    }

    /// Account and state, for state events only.
    pub fn as_state(&self) -> Option<(&AccountId, CuiState)> {
        match self {
            Self::CuiState { cui_id, state } => Some((cui_id, *state)),
            _ => None,
        }
    }
}

/// Last known state of one account, as held by the broadcast hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    /// Account id.
    pub account_id: AccountId,
    /// Current state.
    pub state: CuiState,
    /// When the state was last written.
    pub updated_at: DateTime<Utc>,
}

impl AccountState {
    /// Stamp a new state with the current time.
    pub fn now(account_id: AccountId, state: CuiState) -> Self {
        Self {
            account_id,
            state,
            updated_at: Utc::now(),
        }
    }

    /// The `cui-state` event that reproduces this state.
    pub fn to_event(&self) -> HubEvent {
        HubEvent::state(self.account_id.clone(), self.state)
    }
}
