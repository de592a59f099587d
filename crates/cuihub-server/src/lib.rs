//! # cuihub-server
//!
//! The running hub:
//!
//! - [`manager`]: one reverse-proxy listener per account
//! - [`proxy`]: request classification and the per-shape handlers
//! - [`monitor`]: background stream monitors for intercepted POSTs
//! - [`websocket`]: the broadcast hub and dashboard observer sockets
//! - [`sync`]: file watcher, debounce, and install/build/restart cycles
//! - [`server`]: the dashboard HTTP + WebSocket server
//! - [`shutdown`]: graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod health;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod proxy;
pub mod server;
pub mod shutdown;
pub mod sync;
pub mod websocket;
