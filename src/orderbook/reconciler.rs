//! Applies decoded exchange updates to the local book under sequence discipline.

use rust_decimal::Decimal;
use smallvec::SmallVec;
use time::OffsetDateTime;
use tracing::trace;

use super::levels::{PriceLevelStore, Tolerances};
use super::orders::{OrderTracker, TrackedOrder};
use super::sequence::{SequenceCheck, SequenceGuard};
use super::types::{OrderBookSnapshot, PriceLevel, Side, Trade};
use crate::error::BookError;

/// New absolute volume at a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    /// Price of the level.
    pub price: Decimal,
    /// New absolute volume (not a delta).
    pub volume: Decimal,
}

/// Level changes for one side; most diffs touch only a handful of levels.
pub type LevelChanges = SmallVec<[LevelChange; 8]>;

/// Base volume traded against a resting order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOp {
    /// Maker order id.
    pub order_id: String,
    /// Base volume traded.
    pub base: Decimal,
}

/// A new resting order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOp {
    /// Order id.
    pub order_id: String,
    /// Book side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Volume.
    pub volume: Decimal,
}

/// One decoded book update, in whichever vocabulary the exchange speaks.
#[derive(Debug, Clone, PartialEq)]
pub enum BookUpdate {
    /// Absolute volumes per price level covering `first_id..=last_id`.
    LevelDiff {
        first_id: i64,
        last_id: i64,
        bids: LevelChanges,
        asks: LevelChanges,
        timestamp: OffsetDateTime,
    },
    /// Order-keyed operations carrying a single sequence number.
    OrderOps {
        sequence: i64,
        trades: Vec<TradeOp>,
        create: Option<CreateOp>,
        delete: Option<String>,
        timestamp: OffsetDateTime,
    },
}

impl BookUpdate {
    /// Sequence range covered by this update.
    pub fn sequence_range(&self) -> (i64, i64) {
        match self {
            BookUpdate::LevelDiff {
                first_id, last_id, ..
            } => (*first_id, *last_id),
            BookUpdate::OrderOps { sequence, .. } => (*sequence, *sequence),
        }
    }
}

/// Initial book contents used to seed a reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum SeedBook {
    /// Aggregated levels.
    Levels {
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    },
    /// Individual resting orders.
    Orders(Vec<TrackedOrder>),
}

/// Full book snapshot plus the sequence id it reflects.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSeed {
    /// Sequence id of the snapshot.
    pub sequence_id: i64,
    /// Book contents.
    pub book: SeedBook,
    /// Snapshot timestamp.
    pub timestamp: OffsetDateTime,
}

/// Result of applying one update.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// Update was already applied; nothing changed.
    Stale,
    /// Update was applied.
    Applied {
        /// New public view, present only if the book changed.
        book: Option<OrderBookSnapshot>,
        /// Trades resolved from order-keyed trade operations.
        trades: Vec<Trade>,
    },
}

#[derive(Debug, Clone)]
enum BookState {
    Levels(PriceLevelStore),
    Orders(OrderTracker),
}

/// Owns the replicated book and its sequence state.
///
/// Accessed by a single worker; no internal locking.
#[derive(Debug, Clone)]
pub struct Reconciler {
    state: BookState,
    guard: SequenceGuard,
    timestamp: OffsetDateTime,
}

impl Reconciler {
    /// Build a reconciler from a snapshot.
    ///
    /// A snapshot quoting a negative volume is rejected.
    pub fn from_seed(seed: BookSeed, tolerances: Tolerances) -> Result<Self, BookError> {
        let state = match seed.book {
            SeedBook::Levels { bids, asks } => {
                for (side, levels) in [(Side::Bid, &bids), (Side::Ask, &asks)] {
                    for l in levels {
                        check_volume(side, l.price, l.volume)?;
                    }
                }
                BookState::Levels(PriceLevelStore::seeded(tolerances, &bids, &asks))
            }
            SeedBook::Orders(orders) => {
                for o in &orders {
                    check_volume(o.side, o.price, o.volume)?;
                }
                BookState::Orders(OrderTracker::seeded(tolerances, orders))
            }
        };
        Ok(Self {
            state,
            guard: SequenceGuard::new(seed.sequence_id),
            timestamp: seed.timestamp,
        })
    }

    /// Last applied sequence id.
    pub fn last_sequence(&self) -> i64 {
        self.guard.last_applied()
    }

    /// Apply one update.
    ///
    /// Any error leaves the book in an unknown state; the caller must
    /// discard this reconciler and start again from a fresh snapshot.
    pub fn apply(&mut self, update: BookUpdate) -> Result<Reconciled, BookError> {
        let (first_id, last_id) = update.sequence_range();
        if self.guard.check(first_id, last_id)? == SequenceCheck::Stale {
            trace!(first_id, last_id, last_applied = self.guard.last_applied(), "stale update");
            return Ok(Reconciled::Stale);
        }

        let (changed, trades, timestamp) = match (&mut self.state, update) {
            (
                BookState::Levels(store),
                BookUpdate::LevelDiff {
                    bids,
                    asks,
                    timestamp,
                    ..
                },
            ) => {
                for (side, changes) in [(Side::Bid, &bids), (Side::Ask, &asks)] {
                    for c in changes {
                        check_volume(side, c.price, c.volume)?;
                    }
                }

                let mut changed = false;
                for c in &bids {
                    changed |= store.apply_diff(Side::Bid, c.price, c.volume);
                }
                for c in &asks {
                    changed |= store.apply_diff(Side::Ask, c.price, c.volume);
                }
                (changed, Vec::new(), timestamp)
            }
            (
                BookState::Orders(tracker),
                BookUpdate::OrderOps {
                    trades,
                    create,
                    delete,
                    timestamp,
                    ..
                },
            ) => {
                if let Some(op) = &create {
                    check_volume(op.side, op.price, op.volume)?;
                }

                // Maker side and price come from the order as it rests now,
                // before this update's own trades mutate it.
                let resolved = resolve_trades(tracker, &trades, timestamp)?;

                let mut changed = false;
                for op in &trades {
                    tracker.trade_against(&op.order_id, op.base)?;
                    changed = true;
                }
                if let Some(op) = create {
                    changed |= tracker.create(TrackedOrder {
                        id: op.order_id,
                        price: op.price,
                        volume: op.volume,
                        side: op.side,
                    });
                }
                if let Some(order_id) = delete {
                    changed |= tracker.delete(&order_id);
                }
                (changed, resolved, timestamp)
            }
            (state, update) => {
                return Err(BookError::VocabularyMismatch {
                    book: state.vocabulary(),
                    update: update.vocabulary(),
                })
            }
        };

        self.guard.advance(last_id);
        self.timestamp = timestamp;

        let book = changed.then(|| self.snapshot());
        Ok(Reconciled::Applied { book, trades })
    }

    /// Render the current book as a sorted, timestamped snapshot.
    pub fn snapshot(&self) -> OrderBookSnapshot {
        let (bids, asks) = match &self.state {
            BookState::Levels(store) => (
                store.side(Side::Bid).to_vec(),
                store.side(Side::Ask).to_vec(),
            ),
            BookState::Orders(tracker) => (tracker.levels(Side::Bid), tracker.levels(Side::Ask)),
        };
        OrderBookSnapshot::from_unsorted(self.timestamp, self.guard.last_applied(), bids, asks)
    }
}

/// Quoted volumes are absolute; anything below zero is a protocol violation.
fn check_volume(side: Side, price: Decimal, volume: Decimal) -> Result<(), BookError> {
    if volume < Decimal::ZERO {
        return Err(BookError::NegativeQuote {
            side,
            price,
            volume,
        });
    }
    Ok(())
}

fn resolve_trades(
    tracker: &OrderTracker,
    ops: &[TradeOp],
    timestamp: OffsetDateTime,
) -> Result<Vec<Trade>, BookError> {
    ops.iter()
        .map(|op| {
            let order = tracker
                .get(&op.order_id)
                .ok_or_else(|| BookError::UnknownOrder(op.order_id.clone()))?;
            Ok(Trade {
                maker_side: order.side,
                price: order.price,
                volume: op.base,
                timestamp,
            })
        })
        .collect()
}

impl BookState {
    fn vocabulary(&self) -> &'static str {
        match self {
            BookState::Levels(_) => "level diff",
            BookState::Orders(_) => "order ops",
        }
    }
}

impl BookUpdate {
    fn vocabulary(&self) -> &'static str {
        match self {
            BookUpdate::LevelDiff { .. } => "level diff",
            BookUpdate::OrderOps { .. } => "order ops",
        }
    }
}
