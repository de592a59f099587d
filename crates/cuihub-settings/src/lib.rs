//! # cuihub-settings
//!
//! Configuration for the hub, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **User file**: `~/.cuihub/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CUIHUB_*` overrides (highest priority)
//!
//! The loaded value is validated with [`HubSettings::validate`] before the
//! proxy set is built from it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
