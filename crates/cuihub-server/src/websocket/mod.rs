//! Dashboard observer sockets and the broadcast hub.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod heartbeat;
