//! Resting orders keyed by exchange order id.
//!
//! Used by exchanges that stream individual order create/delete/trade
//! operations rather than aggregated level diffs.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::levels::Tolerances;
use super::types::{PriceLevel, Side};
use crate::error::BookError;

/// A single resting order on the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedOrder {
    /// Exchange-assigned order id.
    pub id: String,
    /// Limit price.
    pub price: Decimal,
    /// Remaining volume.
    pub volume: Decimal,
    /// Side of the book.
    pub side: Side,
}

/// Live set of resting orders.
#[derive(Debug, Clone)]
pub struct OrderTracker {
    orders: HashMap<String, TrackedOrder>,
    tolerances: Tolerances,
}

impl OrderTracker {
    /// Create an empty tracker.
    pub fn new(tolerances: Tolerances) -> Self {
        Self {
            orders: HashMap::new(),
            tolerances,
        }
    }

    /// Create a tracker seeded with snapshot orders.
    pub fn seeded(tolerances: Tolerances, orders: impl IntoIterator<Item = TrackedOrder>) -> Self {
        let mut tracker = Self::new(tolerances);
        for order in orders {
            tracker.create(order);
        }
        tracker
    }

    /// Insert or replace an order. Returns `true` if the book changed.
    pub fn create(&mut self, order: TrackedOrder) -> bool {
        if self.tolerances.is_zero_volume(order.volume) {
            return self.orders.remove(&order.id).is_some();
        }
        self.orders.insert(order.id.clone(), order);
        true
    }

    /// Remove an order. Unknown ids are ignored.
    pub fn delete(&mut self, order_id: &str) -> bool {
        self.orders.remove(order_id).is_some()
    }

    /// Decrement an order's volume by a traded base amount.
    ///
    /// The order is removed once its remaining volume is within tolerance.
    /// A remaining volume below zero is a protocol violation and is never
    /// clamped.
    pub fn trade_against(&mut self, order_id: &str, base_traded: Decimal) -> Result<(), BookError> {
        if base_traded < Decimal::ZERO {
            return Err(BookError::NegativeTrade {
                order_id: order_id.to_string(),
                base: base_traded,
            });
        }

        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BookError::UnknownOrder(order_id.to_string()))?;

        let remaining = order.volume - base_traded;
        if remaining < Decimal::ZERO {
            return Err(BookError::NegativeVolume {
                order_id: order_id.to_string(),
                remaining,
            });
        }

        if self.tolerances.is_zero_volume(remaining) {
            self.orders.remove(order_id);
        } else {
            order.volume = remaining;
        }
        Ok(())
    }

    /// Look up a tracked order.
    pub fn get(&self, order_id: &str) -> Option<&TrackedOrder> {
        self.orders.get(order_id)
    }

    /// Number of tracked orders.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether no orders are tracked.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Aggregate orders on one side into unordered price levels.
    pub fn levels(&self, side: Side) -> Vec<PriceLevel> {
        let mut by_price: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for order in self.orders.values().filter(|o| o.side == side) {
            *by_price.entry(order.price).or_default() += order.volume;
        }
        by_price
            .into_iter()
            .map(|(price, volume)| PriceLevel::new(price, volume))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(id: &str, side: Side, price: Decimal, volume: Decimal) -> TrackedOrder {
        TrackedOrder {
            id: id.to_string(),
            price,
            volume,
            side,
        }
    }

    fn tracker() -> OrderTracker {
        OrderTracker::seeded(
            Tolerances::new(dec!(0.005), dec!(0.01)),
            vec![
                order("b1", Side::Bid, dec!(100), dec!(1.0)),
                order("a1", Side::Ask, dec!(101), dec!(2.0)),
            ],
        )
    }

    #[test]
    fn trade_decrements_volume() {
        let mut t = tracker();
        t.trade_against("b1", dec!(0.25)).unwrap();
        assert_eq!(t.get("b1").unwrap().volume, dec!(0.75));
    }

    #[test]
    fn trade_to_exactly_tolerance_removes_order() {
        let mut t = tracker();
        t.trade_against("b1", dec!(0.99)).unwrap();
        assert!(t.get("b1").is_none());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn trade_below_zero_is_rejected_not_clamped() {
        let mut t = tracker();
        let err = t.trade_against("a1", dec!(2.5)).unwrap_err();
        assert!(matches!(err, BookError::NegativeVolume { ref order_id, remaining }
            if order_id == "a1" && remaining == dec!(-0.5)));
    }

    #[test]
    fn negative_trade_amount_is_rejected() {
        let mut t = tracker();
        assert!(matches!(
            t.trade_against("a1", dec!(-1)),
            Err(BookError::NegativeTrade { .. })
        ));
        assert_eq!(t.get("a1").unwrap().volume, dec!(2.0));
    }

    #[test]
    fn trade_against_unknown_order_fails() {
        let mut t = tracker();
        assert!(matches!(
            t.trade_against("zz", dec!(0.1)),
            Err(BookError::UnknownOrder(ref id)) if id == "zz"
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let mut t = tracker();
        assert!(t.delete("a1"));
        assert!(!t.delete("a1"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn levels_aggregate_orders_at_same_price() {
        let mut t = tracker();
        t.create(order("b2", Side::Bid, dec!(100), dec!(0.5)));
        t.create(order("b3", Side::Bid, dec!(99), dec!(3)));

        let mut levels = t.levels(Side::Bid);
        levels.sort_by(|a, b| a.price.cmp(&b.price));
        assert_eq!(
            levels,
            vec![
                PriceLevel::new(dec!(99), dec!(3)),
                PriceLevel::new(dec!(100), dec!(1.5)),
            ]
        );
    }

    #[test]
    fn create_with_zero_volume_is_not_tracked() {
        let mut t = tracker();
        assert!(!t.create(order("b9", Side::Bid, dec!(98), dec!(0))));
        assert!(t.get("b9").is_none());
    }
}
