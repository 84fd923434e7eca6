//! Luno order-keyed stream.
//!
//! After authenticating, the first frame on a Luno stream is the full book
//! of resting orders; every later frame is a single sequenced update made of
//! trades against resting orders, at most one create and at most one delete.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{parse_decimal, parse_sequence, timestamp_from_millis, Decoder, Inbound, SnapshotSource};
use crate::config::ApiCredentials;
use crate::error::{DecodeError, Result, SnapshotError};
use crate::orderbook::{BookSeed, BookUpdate, CreateOp, SeedBook, Side, TrackedOrder, TradeOp};
use crate::session::Connection;

/// Keep-alive frame: a JSON empty string.
const KEEP_ALIVE: &str = "\"\"";

#[derive(Serialize)]
struct Handshake<'a> {
    api_key_id: &'a str,
    api_key_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    id: String,
    price: String,
    volume: String,
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    sequence: String,
    #[serde(default)]
    bids: Vec<WireOrder>,
    #[serde(default)]
    asks: Vec<WireOrder>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct WireTrade {
    base: String,
    maker_order_id: String,
}

#[derive(Debug, Deserialize)]
struct WireCreate {
    order_id: String,
    #[serde(rename = "type")]
    order_type: String,
    price: String,
    volume: String,
}

#[derive(Debug, Deserialize)]
struct WireDelete {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct WireUpdate {
    sequence: String,
    #[serde(default)]
    trade_updates: Option<Vec<WireTrade>>,
    #[serde(default)]
    create_update: Option<WireCreate>,
    #[serde(default)]
    delete_update: Option<WireDelete>,
    timestamp: i64,
}

/// Stream URL for an exchange symbol under `ws_base`.
pub fn stream_url(ws_base: &str, symbol: &str) -> String {
    format!("{}/api/1/stream/{}", ws_base.trim_end_matches('/'), symbol)
}

fn is_keep_alive(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text == KEEP_ALIVE
}

/// Decoder for Luno update frames.
#[derive(Debug, Clone)]
pub struct LunoDecoder {
    credentials: ApiCredentials,
}

impl LunoDecoder {
    /// Create a decoder that authenticates with `credentials`.
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { credentials }
    }
}

impl Decoder for LunoDecoder {
    fn handshake(&self) -> Option<String> {
        serde_json::to_string(&Handshake {
            api_key_id: &self.credentials.key_id,
            api_key_secret: &self.credentials.secret,
        })
        .ok()
    }

    fn decode(&self, text: &str) -> std::result::Result<Inbound, DecodeError> {
        if is_keep_alive(text) {
            return Ok(Inbound::KeepAlive);
        }

        let update: WireUpdate = serde_json::from_str(text)?;

        let trades = update
            .trade_updates
            .unwrap_or_default()
            .into_iter()
            .map(|t| {
                Ok(TradeOp {
                    base: parse_decimal("base", &t.base)?,
                    order_id: t.maker_order_id,
                })
            })
            .collect::<std::result::Result<Vec<_>, DecodeError>>()?;

        let create = update
            .create_update
            .map(|c| {
                let side = Side::from_str(&c.order_type)
                    .map_err(|_| DecodeError::UnknownOrderType(c.order_type.clone()))?;
                Ok::<_, DecodeError>(CreateOp {
                    side,
                    price: parse_decimal("price", &c.price)?,
                    volume: parse_decimal("volume", &c.volume)?,
                    order_id: c.order_id,
                })
            })
            .transpose()?;

        Ok(Inbound::Book(BookUpdate::OrderOps {
            sequence: parse_sequence(&update.sequence)?,
            trades,
            create,
            delete: update.delete_update.map(|d| d.order_id),
            timestamp: timestamp_from_millis(update.timestamp)?,
        }))
    }
}

/// Decode the initial book frame.
pub fn decode_snapshot(text: &str) -> std::result::Result<BookSeed, DecodeError> {
    let snapshot: WireSnapshot = serde_json::from_str(text)?;

    let mut orders = Vec::with_capacity(snapshot.bids.len() + snapshot.asks.len());
    for (side, wire) in [(Side::Bid, snapshot.bids), (Side::Ask, snapshot.asks)] {
        for o in wire {
            orders.push(TrackedOrder {
                price: parse_decimal("price", &o.price)?,
                volume: parse_decimal("volume", &o.volume)?,
                id: o.id,
                side,
            });
        }
    }

    Ok(BookSeed {
        sequence_id: parse_sequence(&snapshot.sequence)?,
        book: SeedBook::Orders(orders),
        timestamp: timestamp_from_millis(snapshot.timestamp)?,
    })
}

/// Reads the snapshot Luno pushes as the first frame of every connection.
#[derive(Debug, Clone, Copy)]
pub struct LunoSnapshot {
    idle_timeout: Duration,
}

impl LunoSnapshot {
    /// Fail the read if the stream stays silent for `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    async fn first_frame(&self, conn: &mut Connection) -> Result<String> {
        loop {
            match conn.next_text_within(self.idle_timeout).await? {
                Some(text) if is_keep_alive(&text) => continue,
                Some(text) => return Ok(text),
                None => return Err(SnapshotError::StreamEnded.into()),
            }
        }
    }
}

impl SnapshotSource for LunoSnapshot {
    #[instrument(skip_all, fields(connection = conn.id()))]
    async fn fetch(&self, conn: &mut Connection) -> Result<BookSeed> {
        let start = std::time::Instant::now();
        let text = self.first_frame(conn).await?;
        let seed = decode_snapshot(&text).map_err(SnapshotError::from)?;
        crate::metrics::record_snapshot_fetch_latency(start);
        debug!(sequence = seed.sequence_id, "Received book snapshot");
        Ok(seed)
    }

    async fn prepare_standby(&self, conn: &mut Connection) -> Result<()> {
        // The replacement's own snapshot is superseded by the live book.
        let text = self.first_frame(conn).await?;
        debug!(connection = conn.id(), bytes = text.len(), "Discarded standby snapshot");
        Ok(())
    }
}
