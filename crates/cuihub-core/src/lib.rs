//! # cuihub-core
//!
//! Domain types shared by every cuihub crate:
//!
//! - [`ids`]: account and observer identifiers
//! - [`accounts`]: the immutable per-account route table entries
//! - [`events`]: the JSON events fanned out to dashboard observers
//! - [`detector`]: byte-level completion detection for generation streams
//! - [`errors`]: the proxy error taxonomy

#![deny(unsafe_code)]

pub mod accounts;
pub mod detector;
pub mod errors;
pub mod events;
pub mod ids;

pub use accounts::AccountRoute;
pub use errors::ProxyError;
pub use events::{AccountState, CuiState, FileChangeKind, HubEvent, SyncStatus};
pub use ids::{AccountId, ObserverId};
