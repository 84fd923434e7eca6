//! Streaming session lifecycle.
//!
//! This module handles:
//! - Dialing and reading a single WebSocket connection
//! - Seeding the book from a snapshot
//! - Rotating connections before the exchange expires them
//! - Publishing books and trades onto bounded queues

pub mod connection;
pub mod manager;

pub use connection::Connection;
pub use manager::{FollowerStreams, SessionManager, SessionState};
