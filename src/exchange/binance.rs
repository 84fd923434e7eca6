//! Binance combined depth/trade stream and REST depth snapshot.
//!
//! Binance publishes aggregated price-level diffs: each depth event carries
//! the new absolute volume for every level it touches, spanning update ids
//! `U..=u`.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use url::Url;

use super::{parse_decimal, timestamp_from_millis, Decoder, Inbound, SnapshotSource};
use crate::config::InstrumentConfig;
use crate::error::{ConfigError, DecodeError, Result, SnapshotError};
use crate::metrics;
use crate::orderbook::{
    BookSeed, BookUpdate, LevelChange, LevelChanges, PriceLevel, SeedBook, Side, Trade,
};
use crate::session::Connection;

/// Depth levels requested for the REST snapshot.
const SNAPSHOT_LIMIT: &str = "1000";

/// Envelope of the combined stream endpoint.
#[derive(Debug, Deserialize)]
struct StreamFrame {
    stream: String,
    data: serde_json::Value,
}

/// Incremental depth event.
#[derive(Debug, Deserialize)]
struct DepthEvent {
    #[serde(rename = "U")]
    first_update_id: i64,
    #[serde(rename = "u")]
    last_update_id: i64,
    #[serde(rename = "b", default)]
    bids: Vec<Vec<String>>,
    #[serde(rename = "a", default)]
    asks: Vec<Vec<String>>,
    #[serde(rename = "E")]
    event_time: i64,
}

/// Trade event.
#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    /// Whether the buyer was the resting order.
    #[serde(rename = "m")]
    buyer_is_maker: bool,
    #[serde(rename = "E")]
    event_time: i64,
}

/// REST depth snapshot.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    /// Last update id included in the snapshot.
    pub last_update_id: i64,
    /// Bid levels as `[price, volume]` strings.
    pub bids: Vec<Vec<String>>,
    /// Ask levels as `[price, volume]` strings.
    pub asks: Vec<Vec<String>>,
}

/// Decoder for the combined `<symbol>@depth/<symbol>@trade` stream.
#[derive(Debug, Clone)]
pub struct BinanceDecoder {
    depth_channel: String,
    trade_channel: String,
}

impl BinanceDecoder {
    /// Create a decoder for an exchange symbol (e.g. "BTCEUR").
    pub fn new(symbol: &str) -> Self {
        let lower = symbol.to_lowercase();
        Self {
            depth_channel: format!("{lower}@depth"),
            trade_channel: format!("{lower}@trade"),
        }
    }

    /// Combined stream URL under `ws_base`.
    pub fn stream_url(&self, ws_base: &str) -> String {
        format!(
            "{}/stream?streams={}/{}",
            ws_base.trim_end_matches('/'),
            self.depth_channel,
            self.trade_channel
        )
    }

    fn decode_depth(&self, data: serde_json::Value) -> std::result::Result<Inbound, DecodeError> {
        let event: DepthEvent = serde_json::from_value(data)?;
        Ok(Inbound::Book(BookUpdate::LevelDiff {
            first_id: event.first_update_id,
            last_id: event.last_update_id,
            bids: convert_changes(&event.bids)?,
            asks: convert_changes(&event.asks)?,
            timestamp: timestamp_from_millis(event.event_time)?,
        }))
    }

    fn decode_trade(&self, data: serde_json::Value) -> std::result::Result<Inbound, DecodeError> {
        let event: TradeEvent = serde_json::from_value(data)?;
        let maker_side = if event.buyer_is_maker {
            Side::Bid
        } else {
            Side::Ask
        };
        Ok(Inbound::Trade(Trade {
            maker_side,
            price: parse_decimal("price", &event.price)?,
            volume: parse_decimal("quantity", &event.quantity)?,
            timestamp: timestamp_from_millis(event.event_time)?,
        }))
    }
}

impl Decoder for BinanceDecoder {
    fn decode(&self, text: &str) -> std::result::Result<Inbound, DecodeError> {
        if text.trim().is_empty() {
            return Ok(Inbound::KeepAlive);
        }

        let frame: StreamFrame = serde_json::from_str(text)?;
        if frame.data.is_null() {
            return Ok(Inbound::KeepAlive);
        }

        if frame.stream == self.depth_channel {
            self.decode_depth(frame.data)
        } else if frame.stream == self.trade_channel {
            self.decode_trade(frame.data)
        } else {
            Err(DecodeError::UnknownChannel(frame.stream))
        }
    }
}

/// REST snapshot source for Binance.
#[derive(Debug, Clone)]
pub struct BinanceSnapshot {
    http: reqwest::Client,
    url: Url,
    symbol: String,
}

impl BinanceSnapshot {
    /// Create a snapshot source for an instrument.
    pub fn new(
        instrument: &InstrumentConfig,
        http_timeout: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        let base = instrument
            .rest_url
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("binance requires a REST url".to_string()))?;

        let mut url = Url::parse(base)
            .and_then(|u| u.join("api/v3/depth"))
            .map_err(|e| ConfigError::Invalid(format!("invalid binance REST url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("symbol", &instrument.symbol)
            .append_pair("limit", SNAPSHOT_LIMIT);

        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url,
            symbol: instrument.symbol.clone(),
        })
    }

    /// Snapshot request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl SnapshotSource for BinanceSnapshot {
    #[instrument(skip(self, _conn), fields(symbol = %self.symbol))]
    async fn fetch(&self, _conn: &mut Connection) -> Result<BookSeed> {
        let start = Instant::now();

        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .map_err(SnapshotError::from)?;

        if !response.status().is_success() {
            return Err(SnapshotError::Status {
                symbol: self.symbol.clone(),
                status: response.status().as_u16(),
            }
            .into());
        }

        let snapshot: DepthSnapshot = response.json().await.map_err(SnapshotError::from)?;
        metrics::record_snapshot_fetch_latency(start);
        debug!(
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Fetched depth snapshot"
        );

        Ok(seed_from_snapshot(snapshot).map_err(SnapshotError::from)?)
    }
}

/// Convert a REST depth snapshot into a reconciler seed.
pub fn seed_from_snapshot(snapshot: DepthSnapshot) -> std::result::Result<BookSeed, DecodeError> {
    Ok(BookSeed {
        sequence_id: snapshot.last_update_id,
        book: SeedBook::Levels {
            bids: convert_levels(&snapshot.bids)?,
            asks: convert_levels(&snapshot.asks)?,
        },
        timestamp: OffsetDateTime::now_utc(),
    })
}

fn convert_pair(raw: &[String]) -> std::result::Result<(Decimal, Decimal), DecodeError> {
    match raw {
        [price, volume] => Ok((
            parse_decimal("price", price)?,
            parse_decimal("volume", volume)?,
        )),
        _ => Err(DecodeError::MalformedLevel(raw.len())),
    }
}

fn convert_levels(raw: &[Vec<String>]) -> std::result::Result<Vec<PriceLevel>, DecodeError> {
    raw.iter()
        .map(|l| convert_pair(l).map(|(price, volume)| PriceLevel::new(price, volume)))
        .collect()
}

fn convert_changes(raw: &[Vec<String>]) -> std::result::Result<LevelChanges, DecodeError> {
    raw.iter()
        .map(|l| convert_pair(l).map(|(price, volume)| LevelChange { price, volume }))
        .collect()
}
