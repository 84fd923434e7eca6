//! Order book types and data structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// Side of the book a level or resting order sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy side.
    #[strum(serialize = "bid", serialize = "BID", serialize = "buy", serialize = "BUY")]
    Bid,
    /// Sell side.
    #[strum(serialize = "ask", serialize = "ASK", serialize = "sell", serialize = "SELL")]
    Ask,
}

impl Side {
    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total volume resting at this price.
    pub volume: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, volume: Decimal) -> Self {
        Self { price, volume }
    }
}

/// Immutable, sorted view of the replicated book.
///
/// A fresh value is produced on every reconciliation that changed state;
/// consumers never mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookSnapshot {
    /// Exchange timestamp of the update that produced this view.
    pub timestamp: OffsetDateTime,
    /// Sequence id of the last applied update.
    pub sequence_id: i64,
    /// Bid levels sorted by price descending.
    pub bids: Vec<PriceLevel>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevel>,
}

impl OrderBookSnapshot {
    /// Build a snapshot, sorting both sides into public order.
    pub fn from_unsorted(
        timestamp: OffsetDateTime,
        sequence_id: i64,
        mut bids: Vec<PriceLevel>,
        mut asks: Vec<PriceLevel>,
    ) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price)); // Descending
        asks.sort_by(|a, b| a.price.cmp(&b.price)); // Ascending
        Self {
            timestamp,
            sequence_id,
            bids,
            asks,
        }
    }

    /// Get the best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Get the best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Get the spread between best bid and ask.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Calculate the mid price from best bid and ask.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Levels on one side, in public order.
    pub fn side(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Total volume resting on one side.
    pub fn depth(&self, side: Side) -> Decimal {
        self.side(side).iter().map(|l| l.volume).sum()
    }

    /// Check if the book is crossed (best_ask < best_bid).
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask < bid,
            _ => false,
        }
    }
}

/// Trade print as seen against the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trade {
    /// Side of the resting (maker) order.
    pub maker_side: Side,
    /// Execution price.
    pub price: Decimal,
    /// Base volume traded.
    pub volume: Decimal,
    /// Exchange timestamp.
    pub timestamp: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> OrderBookSnapshot {
        OrderBookSnapshot::from_unsorted(OffsetDateTime::UNIX_EPOCH, 1, bids, asks)
    }

    #[test]
    fn snapshot_sorts_sides() {
        let snapshot = book(
            vec![
                PriceLevel::new(dec!(99), dec!(1)),
                PriceLevel::new(dec!(100), dec!(2)),
                PriceLevel::new(dec!(98), dec!(3)),
            ],
            vec![
                PriceLevel::new(dec!(103), dec!(1)),
                PriceLevel::new(dec!(101), dec!(1)),
            ],
        );

        let bid_prices: Vec<_> = snapshot.bids.iter().map(|l| l.price).collect();
        let ask_prices: Vec<_> = snapshot.asks.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![dec!(100), dec!(99), dec!(98)]);
        assert_eq!(ask_prices, vec![dec!(101), dec!(103)]);
    }

    #[test]
    fn snapshot_best_prices() {
        let snapshot = book(
            vec![PriceLevel::new(dec!(100), dec!(1))],
            vec![PriceLevel::new(dec!(102), dec!(1))],
        );

        assert_eq!(snapshot.best_bid(), Some(dec!(100)));
        assert_eq!(snapshot.best_ask(), Some(dec!(102)));
        assert_eq!(snapshot.spread(), Some(dec!(2)));
        assert_eq!(snapshot.mid_price(), Some(dec!(101)));
        assert!(!snapshot.is_crossed());
    }

    #[test]
    fn empty_side_has_no_spread() {
        let snapshot = book(vec![], vec![PriceLevel::new(dec!(102), dec!(1))]);
        assert_eq!(snapshot.best_bid(), None);
        assert_eq!(snapshot.spread(), None);
        assert_eq!(snapshot.depth(Side::Bid), Decimal::ZERO);
        assert_eq!(snapshot.depth(Side::Ask), dec!(1));
    }

    #[test]
    fn side_parses_exchange_tags() {
        assert_eq!("BID".parse::<Side>().unwrap(), Side::Bid);
        assert_eq!("ask".parse::<Side>().unwrap(), Side::Ask);
        assert!("MID".parse::<Side>().is_err());
        assert_eq!(Side::Bid.opposite(), Side::Ask);
    }
}
