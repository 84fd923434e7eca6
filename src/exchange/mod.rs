//! Exchange wire adapters.
//!
//! This module handles:
//! - Exchange and pair identifiers with per-exchange listings
//! - Decoding raw stream frames into the reconciler's update vocabulary
//! - Fetching the initial book snapshot for a session
//! - A static snapshot source for tests

pub mod binance;
pub mod luno;
pub mod mock;
pub mod types;

use std::future::Future;

use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::error::{DecodeError, Result};
use crate::orderbook::{BookSeed, BookUpdate, Trade};
use crate::session::Connection;

pub use binance::{BinanceDecoder, BinanceSnapshot};
pub use luno::{LunoDecoder, LunoSnapshot};
pub use mock::{StaticSnapshot, StaticSnapshotBuilder};
pub use types::{Exchange, Listing, Pair};

/// One decoded stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Heartbeat or empty payload; carries no sequence information.
    KeepAlive,
    /// Book update to reconcile.
    Book(BookUpdate),
    /// Standalone trade print with no sequence dependency.
    Trade(Trade),
}

/// Translates an exchange's raw frames into [`Inbound`] values.
pub trait Decoder: Send + Sync + 'static {
    /// Frame to send right after dialing, if the stream requires one.
    fn handshake(&self) -> Option<String> {
        None
    }

    /// Decode one text frame.
    fn decode(&self, text: &str) -> std::result::Result<Inbound, DecodeError>;
}

/// Supplies the full book a session starts from.
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetch a snapshot for a session whose primary connection is `conn`.
    ///
    /// The connection is already dialed so that updates published while the
    /// snapshot is in flight are buffered rather than lost.
    fn fetch(&self, conn: &mut Connection) -> impl Future<Output = Result<BookSeed>> + Send;

    /// Prepare a freshly dialed rotation connection before it is read as a
    /// stream of updates.
    fn prepare_standby(&self, _conn: &mut Connection) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Convert exchange milliseconds since the epoch.
pub(crate) fn timestamp_from_millis(ms: i64) -> std::result::Result<OffsetDateTime, DecodeError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|_| DecodeError::InvalidTimestamp(ms))
}

/// Parse a decimal string field.
pub(crate) fn parse_decimal(
    field: &'static str,
    raw: &str,
) -> std::result::Result<Decimal, DecodeError> {
    raw.parse().map_err(|_| DecodeError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

/// Parse an integer carried as a string.
pub(crate) fn parse_sequence(raw: &str) -> std::result::Result<i64, DecodeError> {
    raw.parse().map_err(|_| DecodeError::InvalidNumber {
        field: "sequence",
        value: raw.to_string(),
    })
}
