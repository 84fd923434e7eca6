//! Unified error types for the market follower.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::orderbook::Side;

/// Unified error type for the market follower.
#[derive(Error, Debug)]
pub enum FollowerError {
    /// Configuration error, raised before any network activity.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Book reconciliation protocol violation.
    #[error("book error: {0}")]
    Book(#[from] BookError),

    /// Wire message could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Snapshot fetch failed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl FollowerError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FollowerError::Config(_) => "config",
            FollowerError::Book(BookError::Gap { .. }) => "gap",
            FollowerError::Book(_) => "book",
            FollowerError::Decode(_) => "decode",
            FollowerError::WebSocket(_) => "transport",
            FollowerError::Snapshot(_) => "snapshot",
        }
    }
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment could not be loaded.
    #[error("failed to load environment: {0}")]
    Env(#[from] envy::Error),

    /// The exchange does not list the requested pair.
    #[error("{pair} is not supported on {exchange}")]
    UnsupportedInstrument {
        /// Exchange name.
        exchange: String,
        /// Pair name.
        pair: String,
    },

    /// A configured value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Book reconciliation errors.
///
/// Every variant except the aggregator ones is fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    /// Updates were missed between the last applied id and this one.
    #[error("missed updates: got update starting at {first_id} but last applied is {last_applied}")]
    Gap {
        /// Last applied sequence id.
        last_applied: i64,
        /// First id of the offending update.
        first_id: i64,
    },

    /// A trade would leave an order with negative volume.
    #[error("trade would make order {order_id} volume negative ({remaining})")]
    NegativeVolume {
        /// Order id.
        order_id: String,
        /// Resulting volume.
        remaining: Decimal,
    },

    /// An update or snapshot quoted a negative absolute volume.
    #[error("negative {side} volume {volume} at {price}")]
    NegativeQuote {
        /// Book side.
        side: Side,
        /// Quoted price.
        price: Decimal,
        /// Quoted volume.
        volume: Decimal,
    },

    /// A trade reported a negative base amount.
    #[error("negative trade base {base} against order {order_id}")]
    NegativeTrade {
        /// Order id.
        order_id: String,
        /// Reported base amount.
        base: Decimal,
    },

    /// A trade referenced an order that is not on the book.
    #[error("trade against unknown order {0}")]
    UnknownOrder(String),

    /// Update vocabulary does not match the book's storage.
    #[error("cannot apply {update} update to {book} book")]
    VocabularyMismatch {
        /// Book storage vocabulary.
        book: &'static str,
        /// Update vocabulary.
        update: &'static str,
    },

    /// Not enough volume on the book for a price-per-volume walk.
    #[error("insufficient liquidity: need {required}, available {available}")]
    InsufficientLiquidity {
        /// Required volume.
        required: Decimal,
        /// Available volume.
        available: Decimal,
    },

    /// Non-positive volume requested from a price-per-volume walk.
    #[error("invalid volume: {0}")]
    InvalidVolume(Decimal),
}

/// Wire decoding errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// JSON parsing failed.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// A numeric field could not be parsed as a decimal or integer.
    #[error("invalid number in {field}: {value:?}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// A price level was not a `[price, volume]` pair.
    #[error("malformed level: expected 2 fields, got {0}")]
    MalformedLevel(usize),

    /// Unknown order type or side tag.
    #[error("unknown order type {0:?}")]
    UnknownOrderType(String),

    /// Message arrived on a channel this session did not subscribe to.
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),

    /// Timestamp outside the representable range.
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
}

/// WebSocket connection and message errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("websocket connection closed: code={code:?}, reason={reason}")]
    ConnectionClosed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// No frame arrived within the idle timeout.
    #[error("no message received for {0:?}")]
    ReadTimeout(std::time::Duration),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Snapshot fetch errors.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Exchange returned a non-success status.
    #[error("snapshot request for {symbol} failed: HTTP {status}")]
    Status {
        /// Instrument symbol.
        symbol: String,
        /// HTTP status code.
        status: u16,
    },

    /// The stream ended before a snapshot frame arrived.
    #[error("stream closed before snapshot")]
    StreamEnded,

    /// Snapshot payload could not be decoded.
    #[error("invalid snapshot: {0}")]
    Decode(#[from] DecodeError),
}

/// Moving window statistics errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    /// The requested window reaches past the retention period.
    #[error("window of {requested:?} exceeds retention of {retention:?}")]
    OutOfRange {
        /// How far back the query reached.
        requested: time::Duration,
        /// Configured retention.
        retention: time::Duration,
    },
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, FollowerError>;
