//! Local order book replica.
//!
//! This module handles:
//! - Book types and the public snapshot view
//! - Price-level storage with instrument tolerances
//! - Order-keyed storage for exchanges that stream individual orders
//! - Sequence gap detection
//! - Reconciliation of decoded updates into fresh snapshots

pub mod aggregator;
pub mod levels;
pub mod orders;
pub mod reconciler;
pub mod sequence;
pub mod types;

pub use aggregator::{price_per_volume, volume_price, VolumePrice};
pub use levels::{PriceLevelStore, Tolerances};
pub use orders::{OrderTracker, TrackedOrder};
pub use reconciler::{
    BookSeed, BookUpdate, CreateOp, LevelChange, LevelChanges, Reconciled, Reconciler, SeedBook,
    TradeOp,
};
pub use sequence::{SequenceCheck, SequenceGuard};
pub use types::{OrderBookSnapshot, PriceLevel, Side, Trade};
