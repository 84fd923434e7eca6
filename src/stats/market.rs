//! Market statistics fed from the follower's book and trade queues.

use std::fmt;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::moving::MovingStats;
use crate::error::StatsError;
use crate::orderbook::{price_per_volume, OrderBookSnapshot, Side, Trade};

/// Moving statistics derived from one instrument's books and trades.
///
/// Clones share the same series, so one clone can feed while another reports.
#[derive(Debug, Clone)]
pub struct MarketStats {
    best_bid: MovingStats,
    best_ask: MovingStats,
    volume_buy_price: MovingStats,
    volume_sell_price: MovingStats,
    buy_sell_weight: MovingStats,
    volume_depth: Decimal,
}

/// Point-in-time summary over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsReport {
    /// Latest best bid.
    pub best_bid: f64,
    /// Best bid change over the window.
    pub best_bid_gradient: f64,
    /// Latest best ask.
    pub best_ask: f64,
    /// Best ask change over the window.
    pub best_ask_gradient: f64,
    /// Mean price to buy the configured volume.
    pub volume_buy_price: f64,
    /// Change of the volume buy price over the window.
    pub volume_buy_gradient: f64,
    /// Mean price to sell the configured volume.
    pub volume_sell_price: f64,
    /// Change of the volume sell price over the window.
    pub volume_sell_gradient: f64,
    /// Net traded volume; trades against resting bids count negative.
    pub buy_sell_weight: f64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sell {:.2} ({:+.2}) | bid {:.2} ({:+.2}) | ask {:.2} ({:+.2}) | buy {:.2} ({:+.2}) | weight {:.4}",
            self.volume_sell_price,
            self.volume_sell_gradient,
            self.best_bid,
            self.best_bid_gradient,
            self.best_ask,
            self.best_ask_gradient,
            self.volume_buy_price,
            self.volume_buy_gradient,
            self.buy_sell_weight,
        )
    }
}

fn as_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

impl MarketStats {
    /// Create empty statistics.
    ///
    /// `volume_depth` is the base volume walked for the buy/sell prices.
    pub fn new(retention: Duration, volume_depth: Decimal) -> Self {
        Self {
            best_bid: MovingStats::new(retention),
            best_ask: MovingStats::new(retention),
            volume_buy_price: MovingStats::new(retention),
            volume_sell_price: MovingStats::new(retention),
            buy_sell_weight: MovingStats::new(retention),
            volume_depth,
        }
    }

    /// Record a published book.
    pub fn record_book(&self, book: &OrderBookSnapshot) {
        if let Some(bid) = book.best_bid() {
            self.best_bid.add(book.timestamp, as_f64(bid));
        }
        if let Some(ask) = book.best_ask() {
            self.best_ask.add(book.timestamp, as_f64(ask));
        }

        match price_per_volume(book, self.volume_depth) {
            Ok((buy, sell)) => {
                self.volume_buy_price.add(book.timestamp, as_f64(buy));
                self.volume_sell_price.add(book.timestamp, as_f64(sell));
            }
            Err(e) => debug!(error = %e, sequence = book.sequence_id, "Skipping volume price"),
        }
    }

    /// Record a trade print.
    pub fn record_trade(&self, trade: &Trade) {
        let weight = match trade.maker_side {
            Side::Bid => -trade.volume,
            Side::Ask => trade.volume,
        };
        self.buy_sell_weight.add(trade.timestamp, as_f64(weight));
    }

    /// Summarise the trailing `window`.
    pub fn report(&self, window: Duration) -> Result<StatsReport, StatsError> {
        Ok(StatsReport {
            best_bid: self.best_bid.latest(),
            best_bid_gradient: self.best_bid.gradient_over(window)?,
            best_ask: self.best_ask.latest(),
            best_ask_gradient: self.best_ask.gradient_over(window)?,
            volume_buy_price: self.volume_buy_price.mean_over(window)?,
            volume_buy_gradient: self.volume_buy_price.gradient_over(window)?,
            volume_sell_price: self.volume_sell_price.mean_over(window)?,
            volume_sell_gradient: self.volume_sell_price.gradient_over(window)?,
            buy_sell_weight: self.buy_sell_weight.sum_over(window)?,
        })
    }

    /// Signed trade volume series.
    pub fn buy_sell_weight(&self) -> &MovingStats {
        &self.buy_sell_weight
    }

    /// Best bid series.
    pub fn best_bid(&self) -> &MovingStats {
        &self.best_bid
    }

    /// Best ask series.
    pub fn best_ask(&self) -> &MovingStats {
        &self.best_ask
    }

    /// Consume both queues on a new task until they close or `cancel` fires.
    pub fn spawn_feeder(
        &self,
        mut books: mpsc::Receiver<OrderBookSnapshot>,
        mut trades: mpsc::Receiver<Trade>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let stats = self.clone();
        tokio::spawn(async move {
            let mut books_open = true;
            let mut trades_open = true;

            while books_open || trades_open {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    book = books.recv(), if books_open => match book {
                        Some(book) => stats.record_book(&book),
                        None => books_open = false,
                    },
                    trade = trades.recv(), if trades_open => match trade {
                        Some(trade) => stats.record_trade(&trade),
                        None => trades_open = false,
                    },
                }
            }
            info!("Statistics feeder stopped");
        })
    }
}
