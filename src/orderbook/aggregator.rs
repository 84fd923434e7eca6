//! Price-per-volume calculations over a published book.

use rust_decimal::Decimal;
use tracing::instrument;

use super::types::{OrderBookSnapshot, PriceLevel};
use crate::error::BookError;

/// Result of walking one side of the book for a target volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePrice {
    /// Volume-weighted average price over the walked levels.
    pub vwap: Decimal,
    /// Total quote cost of the walk.
    pub total_cost: Decimal,
    /// Worst price touched.
    pub worst_price: Decimal,
}

/// Volume-weighted price to fill `volume` by walking `levels` in order.
///
/// `levels` must already be in public order (best price first).
#[instrument(skip(levels), fields(volume = %volume))]
pub fn volume_price(levels: &[PriceLevel], volume: Decimal) -> Result<VolumePrice, BookError> {
    if volume <= Decimal::ZERO {
        return Err(BookError::InvalidVolume(volume));
    }

    let mut remaining = volume;
    let mut total_cost = Decimal::ZERO;
    let mut worst_price = Decimal::ZERO;

    for level in levels {
        if remaining.is_zero() {
            break;
        }

        let fill = remaining.min(level.volume);
        total_cost += fill * level.price;
        remaining -= fill;
        worst_price = level.price;
    }

    if !remaining.is_zero() {
        return Err(BookError::InsufficientLiquidity {
            required: volume,
            available: volume - remaining,
        });
    }

    Ok(VolumePrice {
        vwap: total_cost / volume,
        total_cost,
        worst_price,
    })
}

/// Buy-side and sell-side volume prices for a book.
///
/// Returns `(buy, sell)`: buying walks the asks, selling walks the bids.
pub fn price_per_volume(
    book: &OrderBookSnapshot,
    volume: Decimal,
) -> Result<(Decimal, Decimal), BookError> {
    let buy = volume_price(&book.asks, volume)?;
    let sell = volume_price(&book.bids, volume)?;
    Ok((buy.vwap, sell.vwap))
}
