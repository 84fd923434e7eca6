//! Exchange order book follower.
//!
//! This library keeps a local replica of one exchange order book consistent
//! with the exchange's update stream and derives short-horizon statistics
//! from it.
//!
//! # Pipeline
//!
//! ```text
//! snapshot ──► Reconciler ◄── Decoder ◄── WebSocket frames
//!                  │
//!                  ├──► books  (capacity 1) ──┐
//!                  └──► trades (capacity 1) ──┴──► MarketStats
//! ```
//!
//! Any sequence gap, decode failure or transport failure ends the session
//! and closes both queues. The [`supervisor`] restarts from a fresh
//! snapshot.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`exchange`]: Per-exchange decoders and snapshot sources
//! - [`orderbook`]: Book storage, sequence guard and reconciliation
//! - [`session`]: Connection lifecycle and rotation
//! - [`follower`]: Exchange factory
//! - [`supervisor`]: Restart with backoff
//! - [`stats`]: Moving window statistics
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod config;
pub mod error;
pub mod exchange;
pub mod follower;
pub mod metrics;
pub mod orderbook;
pub mod session;
pub mod stats;
pub mod supervisor;
pub mod utils;

pub use config::Config;
pub use error::{FollowerError, Result};
