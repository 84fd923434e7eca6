//! Static snapshot source for unit and integration testing.
//!
//! Serves a fixed seed without touching the network, so a session can be
//! driven against a local stream server.

use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::SnapshotSource;
use crate::error::Result;
use crate::orderbook::{BookSeed, PriceLevel, SeedBook, Side, TrackedOrder};
use crate::session::Connection;

/// Snapshot source that always returns the same seed.
#[derive(Debug, Clone)]
pub struct StaticSnapshot {
    seed: BookSeed,
}

impl StaticSnapshot {
    /// Serve `seed` on every fetch.
    pub fn new(seed: BookSeed) -> Self {
        Self { seed }
    }

    /// Seed returned by [`fetch`](SnapshotSource::fetch).
    pub fn seed(&self) -> &BookSeed {
        &self.seed
    }
}

impl SnapshotSource for StaticSnapshot {
    async fn fetch(&self, _conn: &mut Connection) -> Result<BookSeed> {
        Ok(self.seed.clone())
    }
}

/// Builder for creating test seeds.
#[derive(Debug, Clone)]
pub struct StaticSnapshotBuilder {
    sequence_id: i64,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    orders: Vec<TrackedOrder>,
    timestamp: OffsetDateTime,
}

impl StaticSnapshotBuilder {
    /// Start a seed at `sequence_id`.
    pub fn new(sequence_id: i64) -> Self {
        Self {
            sequence_id,
            bids: Vec::new(),
            asks: Vec::new(),
            orders: Vec::new(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    /// Add a bid level.
    pub fn bid(mut self, price: Decimal, volume: Decimal) -> Self {
        self.bids.push(PriceLevel::new(price, volume));
        self
    }

    /// Add an ask level.
    pub fn ask(mut self, price: Decimal, volume: Decimal) -> Self {
        self.asks.push(PriceLevel::new(price, volume));
        self
    }

    /// Add a resting order. Any order switches the seed to order-keyed.
    pub fn order(mut self, id: &str, side: Side, price: Decimal, volume: Decimal) -> Self {
        self.orders.push(TrackedOrder {
            id: id.to_string(),
            price,
            volume,
            side,
        });
        self
    }

    /// Set the seed timestamp.
    pub fn timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the seed.
    pub fn build_seed(self) -> BookSeed {
        let book = if self.orders.is_empty() {
            SeedBook::Levels {
                bids: self.bids,
                asks: self.asks,
            }
        } else {
            SeedBook::Orders(self.orders)
        };
        BookSeed {
            sequence_id: self.sequence_id,
            book,
            timestamp: self.timestamp,
        }
    }

    /// Build the snapshot source.
    pub fn build(self) -> StaticSnapshot {
        StaticSnapshot::new(self.build_seed())
    }
}
