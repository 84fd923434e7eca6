//! Short-horizon market statistics.
//!
//! This module handles:
//! - A lock-protected moving window of timestamped observations
//! - Feeding book and trade events into per-metric windows
//! - Periodic reports over a trailing window

pub mod market;
pub mod moving;

pub use market::{MarketStats, StatsReport};
pub use moving::MovingStats;
