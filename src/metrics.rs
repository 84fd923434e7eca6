//! Prometheus metrics for the follower pipeline.
//!
//! This module provides metrics for:
//! - Stream message processing latency
//! - Snapshot fetch latency
//! - Published books and trades
//! - Stale updates and sequence gaps
//! - Connection rotations, session closes and restarts

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

// === Metric Name Constants ===

/// WebSocket message latency metric name.
pub const METRIC_WS_MESSAGE_LATENCY: &str = "ws_message_latency_ms";
/// Snapshot fetch latency metric name.
pub const METRIC_SNAPSHOT_FETCH_LATENCY: &str = "snapshot_fetch_latency_ms";
/// WebSocket messages received counter metric name.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "ws_messages_received_total";
/// Book snapshots published counter metric name.
pub const METRIC_BOOKS_PUBLISHED: &str = "book_snapshots_published_total";
/// Trades published counter metric name.
pub const METRIC_TRADES_PUBLISHED: &str = "trades_published_total";
/// Stale updates counter metric name.
pub const METRIC_STALE_UPDATES: &str = "stale_updates_total";
/// Sequence gaps counter metric name.
pub const METRIC_SEQUENCE_GAPS: &str = "sequence_gaps_total";
/// Connection rotations counter metric name.
pub const METRIC_CONNECTION_ROTATIONS: &str = "connection_rotations_total";
/// Sessions closed counter metric name.
pub const METRIC_SESSIONS_CLOSED: &str = "sessions_closed_total";
/// Session restarts counter metric name.
pub const METRIC_SESSION_RESTARTS: &str = "session_restarts_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_WS_MESSAGE_LATENCY,
        "Stream frame decode and reconcile latency in milliseconds"
    );
    describe_histogram!(
        METRIC_SNAPSHOT_FETCH_LATENCY,
        "Initial book snapshot fetch latency in milliseconds"
    );

    describe_counter!(
        METRIC_WS_MESSAGES_RECEIVED,
        "Total number of WebSocket messages received"
    );
    describe_counter!(
        METRIC_BOOKS_PUBLISHED,
        "Total number of book snapshots published"
    );
    describe_counter!(METRIC_TRADES_PUBLISHED, "Total number of trades published");
    describe_counter!(
        METRIC_STALE_UPDATES,
        "Total number of already-applied updates discarded"
    );
    describe_counter!(
        METRIC_SEQUENCE_GAPS,
        "Total number of sequence gaps detected"
    );
    describe_counter!(
        METRIC_CONNECTION_ROTATIONS,
        "Total number of streaming connection rotations"
    );
    describe_counter!(
        METRIC_SESSIONS_CLOSED,
        "Total number of follower sessions closed, by reason"
    );
    describe_counter!(
        METRIC_SESSION_RESTARTS,
        "Total number of follower sessions restarted by the supervisor"
    );

    debug!("Metrics initialized");
}

/// Record snapshot fetch latency.
pub fn record_snapshot_fetch_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_SNAPSHOT_FETCH_LATENCY).record(latency_ms);
}

/// Increment WebSocket messages received counter.
pub fn inc_ws_messages_received() {
    counter!(METRIC_WS_MESSAGES_RECEIVED).increment(1);
}

/// Increment book snapshots published counter.
pub fn inc_books_published() {
    counter!(METRIC_BOOKS_PUBLISHED).increment(1);
}

/// Increment trades published counter.
pub fn inc_trades_published() {
    counter!(METRIC_TRADES_PUBLISHED).increment(1);
}

/// Increment stale updates counter.
pub fn inc_stale_updates() {
    counter!(METRIC_STALE_UPDATES).increment(1);
}

/// Increment sequence gaps counter.
pub fn inc_sequence_gaps() {
    counter!(METRIC_SEQUENCE_GAPS).increment(1);
}

/// Increment connection rotations counter.
pub fn inc_connection_rotations() {
    counter!(METRIC_CONNECTION_ROTATIONS).increment(1);
}

/// Increment sessions closed counter.
pub fn inc_sessions_closed(reason: &'static str) {
    counter!(METRIC_SESSIONS_CLOSED, "reason" => reason).increment(1);
}

/// Increment session restarts counter.
pub fn inc_session_restarts() {
    counter!(METRIC_SESSION_RESTARTS).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for WebSocket message processing.
pub fn timer_ws_message() -> LatencyTimer {
    LatencyTimer::new(METRIC_WS_MESSAGE_LATENCY)
}
