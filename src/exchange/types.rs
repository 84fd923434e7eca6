//! Exchange and instrument identifiers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported exchange feeds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Exchange {
    /// Binance spot: aggregated price-level diffs.
    #[default]
    Binance,
    /// Luno: order-keyed create/delete/trade operations.
    Luno,
}

/// Trading pairs known to the follower.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Pair {
    #[default]
    BtcEur,
    BtcGbp,
    BtcUsdt,
    LtcBtc,
    EthBtc,
    BchBtc,
}

/// Exchange-specific listing details for one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Exchange symbol (e.g. "BTCEUR", "XBTEUR").
    pub symbol: &'static str,
    /// Smallest price increment.
    pub price_tick: Decimal,
    /// Smallest volume increment.
    pub volume_tick: Decimal,
}

impl Exchange {
    /// Look up how this exchange lists `pair`.
    pub fn listing(&self, pair: Pair) -> Option<Listing> {
        let cents = Decimal::new(1, 2);
        let micro = Decimal::new(1, 6);
        let satoshi = Decimal::new(1, 8);

        let (symbol, price_tick, volume_tick) = match (self, pair) {
            (Exchange::Binance, Pair::BtcEur) => ("BTCEUR", cents, satoshi),
            (Exchange::Binance, Pair::BtcGbp) => ("BTCGBP", cents, satoshi),
            (Exchange::Binance, Pair::BtcUsdt) => ("BTCUSDT", cents, satoshi),
            (Exchange::Binance, Pair::LtcBtc) => ("LTCBTC", micro, Decimal::new(1, 2)),
            (Exchange::Binance, Pair::EthBtc) => ("ETHBTC", micro, Decimal::new(1, 3)),
            (Exchange::Binance, Pair::BchBtc) => ("BCHBTC", micro, Decimal::new(1, 3)),
            (Exchange::Luno, Pair::BtcEur) => ("XBTEUR", cents, satoshi),
            (Exchange::Luno, Pair::LtcBtc) => ("LTCXBT", micro, Decimal::new(1, 2)),
            _ => return None,
        };

        Some(Listing {
            symbol,
            price_tick,
            volume_tick,
        })
    }
}
