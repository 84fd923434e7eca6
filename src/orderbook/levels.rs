//! Price-keyed level storage for exchanges that publish absolute level diffs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{PriceLevel, Side};

/// Instrument-specific equality thresholds.
///
/// Two prices whose difference is at most `price` are the same level; a
/// volume whose magnitude is at most `volume` is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Price equality tolerance.
    pub price: Decimal,
    /// Volume zero tolerance.
    pub volume: Decimal,
}

impl Tolerances {
    /// Create tolerances from explicit thresholds.
    pub fn new(price: Decimal, volume: Decimal) -> Self {
        Self { price, volume }
    }

    /// Derive tolerances from instrument tick sizes (half a tick each).
    pub fn from_ticks(price_tick: Decimal, volume_tick: Decimal) -> Self {
        Self {
            price: price_tick / Decimal::TWO,
            volume: volume_tick / Decimal::TWO,
        }
    }

    /// Whether two prices refer to the same level.
    pub fn prices_equal(&self, a: Decimal, b: Decimal) -> bool {
        (a - b).abs() <= self.price
    }

    /// Whether a volume should be treated as zero.
    pub fn is_zero_volume(&self, volume: Decimal) -> bool {
        volume.abs() <= self.volume
    }
}

/// Unordered levels for both sides of a book.
///
/// Storage is not kept sorted; ordering is only imposed when rendering a
/// public snapshot.
#[derive(Debug, Clone)]
pub struct PriceLevelStore {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    tolerances: Tolerances,
}

impl PriceLevelStore {
    /// Create an empty store.
    pub fn new(tolerances: Tolerances) -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            tolerances,
        }
    }

    /// Create a store seeded with snapshot levels.
    ///
    /// Seed levels pass through [`apply_diff`](Self::apply_diff) so zero
    /// volumes and duplicated prices collapse the same way live diffs do.
    pub fn seeded(tolerances: Tolerances, bids: &[PriceLevel], asks: &[PriceLevel]) -> Self {
        let mut store = Self::new(tolerances);
        for level in bids {
            store.apply_diff(Side::Bid, level.price, level.volume);
        }
        for level in asks {
            store.apply_diff(Side::Ask, level.price, level.volume);
        }
        store
    }

    /// Tolerances this store was built with.
    pub fn tolerances(&self) -> Tolerances {
        self.tolerances
    }

    /// Set the absolute volume at `price`.
    ///
    /// Returns `true` if the store changed.
    pub fn apply_diff(&mut self, side: Side, price: Decimal, new_volume: Decimal) -> bool {
        let tolerances = self.tolerances;
        let levels = self.side_mut(side);

        if let Some(i) = levels
            .iter()
            .position(|l| tolerances.prices_equal(l.price, price))
        {
            if tolerances.is_zero_volume(new_volume) {
                levels.swap_remove(i);
                return true;
            }
            let changed = levels[i].volume != new_volume;
            levels[i].volume = new_volume;
            return changed;
        }

        if tolerances.is_zero_volume(new_volume) {
            return false;
        }
        levels.push(PriceLevel::new(price, new_volume));
        true
    }

    /// Volume currently at `price`, if a level exists.
    pub fn volume_at(&self, side: Side, price: Decimal) -> Option<Decimal> {
        self.side(side)
            .iter()
            .find(|l| self.tolerances.prices_equal(l.price, price))
            .map(|l| l.volume)
    }

    /// Raw, unordered levels on one side.
    pub fn side(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Number of levels on one side.
    pub fn len(&self, side: Side) -> usize {
        self.side(side).len()
    }

    /// Whether both sides are empty.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tolerances() -> Tolerances {
        Tolerances::from_ticks(dec!(0.01), dec!(0.00000001))
    }

    fn sorted(store: &PriceLevelStore, side: Side) -> Vec<(Decimal, Decimal)> {
        let mut levels: Vec<_> = store.side(side).iter().map(|l| (l.price, l.volume)).collect();
        levels.sort();
        levels
    }

    #[test]
    fn from_ticks_halves_precision() {
        let t = tolerances();
        assert_eq!(t.price, dec!(0.005));
        assert_eq!(t.volume, dec!(0.000000005));
    }

    #[test]
    fn apply_diff_inserts_new_level() {
        let mut store = PriceLevelStore::new(tolerances());
        assert!(store.apply_diff(Side::Bid, dec!(100.00), dec!(1.5)));
        assert_eq!(store.volume_at(Side::Bid, dec!(100)), Some(dec!(1.5)));
        assert_eq!(store.len(Side::Ask), 0);
    }

    #[test]
    fn apply_diff_replaces_volume_not_adds() {
        let mut store = PriceLevelStore::new(tolerances());
        store.apply_diff(Side::Ask, dec!(101), dec!(2));
        store.apply_diff(Side::Ask, dec!(101), dec!(0.5));

        assert_eq!(store.len(Side::Ask), 1);
        assert_eq!(store.volume_at(Side::Ask, dec!(101)), Some(dec!(0.5)));
    }

    #[test]
    fn apply_diff_matches_price_within_tolerance() {
        let mut store = PriceLevelStore::new(tolerances());
        store.apply_diff(Side::Bid, dec!(100.00), dec!(1));
        store.apply_diff(Side::Bid, dec!(100.004), dec!(3));

        assert_eq!(store.len(Side::Bid), 1);
        assert_eq!(store.volume_at(Side::Bid, dec!(100.00)), Some(dec!(3)));

        // A full tick away is a different level.
        store.apply_diff(Side::Bid, dec!(100.01), dec!(4));
        assert_eq!(store.len(Side::Bid), 2);
    }

    #[test]
    fn apply_diff_below_tolerance_removes_level() {
        let mut store = PriceLevelStore::new(tolerances());
        store.apply_diff(Side::Bid, dec!(100), dec!(1));

        assert!(store.apply_diff(Side::Bid, dec!(100), dec!(0.000000001)));
        assert_eq!(store.volume_at(Side::Bid, dec!(100)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn removed_level_stays_removed_until_non_trivial_diff() {
        let mut store = PriceLevelStore::new(tolerances());
        store.apply_diff(Side::Ask, dec!(101), dec!(1));
        store.apply_diff(Side::Ask, dec!(101), dec!(0));

        // Other activity and further zero diffs do not resurrect it.
        store.apply_diff(Side::Ask, dec!(102), dec!(1));
        assert!(!store.apply_diff(Side::Ask, dec!(101), dec!(0)));
        assert!(!store.apply_diff(Side::Ask, dec!(101), dec!(0.000000002)));
        assert_eq!(store.volume_at(Side::Ask, dec!(101)), None);

        store.apply_diff(Side::Ask, dec!(101), dec!(0.25));
        assert_eq!(store.volume_at(Side::Ask, dec!(101)), Some(dec!(0.25)));
    }

    #[test]
    fn zero_diff_for_missing_level_is_noop() {
        let mut store = PriceLevelStore::new(tolerances());
        assert!(!store.apply_diff(Side::Bid, dec!(50), dec!(0)));
        assert!(store.is_empty());
    }

    #[test]
    fn seeded_store_drops_zero_levels() {
        let store = PriceLevelStore::seeded(
            tolerances(),
            &[
                PriceLevel::new(dec!(100), dec!(1)),
                PriceLevel::new(dec!(99), dec!(0)),
            ],
            &[PriceLevel::new(dec!(101), dec!(2))],
        );
        assert_eq!(store.len(Side::Bid), 1);
        assert_eq!(store.len(Side::Ask), 1);
    }

    #[test]
    fn one_at_a_time_equals_batch() {
        let diffs = vec![
            vec![(Side::Bid, dec!(100), dec!(1)), (Side::Ask, dec!(101), dec!(2))],
            vec![(Side::Bid, dec!(99), dec!(3)), (Side::Bid, dec!(100), dec!(0))],
            vec![(Side::Ask, dec!(101), dec!(0.5)), (Side::Ask, dec!(102), dec!(4))],
            vec![(Side::Bid, dec!(100), dec!(6)), (Side::Ask, dec!(102), dec!(0))],
        ];

        let mut incremental = PriceLevelStore::new(tolerances());
        for diff in &diffs {
            for &(side, price, volume) in diff {
                incremental.apply_diff(side, price, volume);
            }
        }

        // Collapse every diff into one, last write per price wins.
        let mut bids = std::collections::BTreeMap::new();
        let mut asks = std::collections::BTreeMap::new();
        for &(side, price, volume) in diffs.iter().flatten() {
            match side {
                Side::Bid => bids.insert(price, volume),
                Side::Ask => asks.insert(price, volume),
            };
        }
        let mut batched = PriceLevelStore::new(tolerances());
        for (price, volume) in bids {
            batched.apply_diff(Side::Bid, price, volume);
        }
        for (price, volume) in asks {
            batched.apply_diff(Side::Ask, price, volume);
        }

        assert_eq!(sorted(&incremental, Side::Bid), sorted(&batched, Side::Bid));
        assert_eq!(sorted(&incremental, Side::Ask), sorted(&batched, Side::Ask));
        assert_eq!(
            sorted(&batched, Side::Bid),
            vec![(dec!(99), dec!(3)), (dec!(100), dec!(6))]
        );
        assert_eq!(sorted(&batched, Side::Ask), vec![(dec!(101), dec!(0.5))]);
    }
}
