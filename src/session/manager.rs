//! Streaming session: snapshot, live reconciliation and connection rotation.
//!
//! One worker task owns the connection, the decoder and the reconciler.
//! Books and trades leave the worker through two single-slot queues, so a
//! slow consumer stalls ingestion instead of growing a backlog.

use std::time::Duration;

use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::connection::Connection;
use crate::config::SessionConfig;
use crate::error::{BookError, Result, WsError};
use crate::exchange::{Decoder, Inbound, SnapshotSource};
use crate::metrics;
use crate::orderbook::{OrderBookSnapshot, Reconciled, Reconciler, Tolerances, Trade};

/// Upper bound on a graceful close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    /// No connection yet.
    Disconnected,
    /// Connected, waiting for the initial book.
    Snapshotting,
    /// Applying updates from the primary connection.
    Live,
    /// A replacement connection is open alongside the primary.
    Rotating,
    /// Terminated; output queues are closed.
    Closed,
}

/// Consumer side of a running session.
#[derive(Debug)]
pub struct FollowerStreams {
    /// Book snapshots, one per state-changing update.
    pub books: mpsc::Receiver<OrderBookSnapshot>,
    /// Trade prints.
    pub trades: mpsc::Receiver<Trade>,
    /// Current session state.
    pub state: watch::Receiver<SessionState>,
    /// Resolves when the session ends; `Err` carries the fatal condition.
    pub handle: JoinHandle<Result<()>>,
}

/// Why a session ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Cancelled,
    ConsumersGone,
}

impl Stop {
    fn reason(self) -> &'static str {
        match self {
            Stop::Cancelled => "cancelled",
            Stop::ConsumersGone => "consumers_gone",
        }
    }
}

struct Outputs {
    books: mpsc::Sender<OrderBookSnapshot>,
    trades: mpsc::Sender<Trade>,
    state: watch::Sender<SessionState>,
}

impl Outputs {
    fn transition(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "Session state changed");
        }
    }

    fn abandoned(&self) -> bool {
        self.books.is_closed() && self.trades.is_closed()
    }

    async fn book(&self, book: OrderBookSnapshot, cancel: &CancellationToken) -> Option<Stop> {
        let stop = publish(&self.books, book, cancel).await;
        if stop.is_none() {
            metrics::inc_books_published();
        }
        stop.or_else(|| self.abandoned().then_some(Stop::ConsumersGone))
    }

    async fn trade(&self, trade: Trade, cancel: &CancellationToken) -> Option<Stop> {
        let stop = publish(&self.trades, trade, cancel).await;
        if stop.is_none() {
            metrics::inc_trades_published();
        }
        stop.or_else(|| self.abandoned().then_some(Stop::ConsumersGone))
    }
}

/// Send one value, waiting for the slot to free up unless cancelled.
///
/// A dropped receiver is not an error; the other queue may still be read.
async fn publish<T>(tx: &mpsc::Sender<T>, value: T, cancel: &CancellationToken) -> Option<Stop> {
    if tx.is_closed() {
        return None;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Some(Stop::Cancelled),
        sent = tx.send(value) => {
            if sent.is_err() {
                debug!("Receiver dropped, value discarded");
            }
            None
        }
    }
}

/// Primary connection plus the replacement opened during rotation.
struct Handles {
    primary: Connection,
    standby: Option<Connection>,
}

impl Handles {
    fn rotation_due(&self, lifetime: Duration) -> bool {
        self.standby.is_none() && self.primary.age() >= lifetime
    }

    fn standby_ready(&self, overlap: Duration) -> bool {
        self.standby.as_ref().is_some_and(|c| c.age() >= overlap)
    }

    /// Time until the next rotation step is due.
    fn next_deadline(&self, lifetime: Duration, overlap: Duration) -> Duration {
        match &self.standby {
            Some(standby) => overlap.saturating_sub(standby.age()),
            None => lifetime.saturating_sub(self.primary.age()),
        }
    }

    /// Make the standby primary and hand back the retired connection.
    fn promote(&mut self) -> Option<Connection> {
        let next = self.standby.take()?;
        Some(std::mem::replace(&mut self.primary, next))
    }

    async fn close(self) {
        for conn in std::iter::once(self.primary).chain(self.standby) {
            retire(conn).await;
        }
    }
}

async fn retire(conn: Connection) {
    let id = conn.id();
    if tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await.is_err() {
        debug!(connection = id, "Close handshake timed out");
    }
}

/// Drives one streaming session for one instrument.
///
/// A session never restarts itself: any fatal condition closes the output
/// queues and surfaces through [`FollowerStreams::handle`].
pub struct SessionManager<D, S> {
    decoder: D,
    snapshots: S,
    url: String,
    tolerances: Tolerances,
    config: SessionConfig,
}

impl<D: Decoder, S: SnapshotSource> SessionManager<D, S> {
    /// Create a session for the stream at `url`.
    pub fn new(
        decoder: D,
        snapshots: S,
        url: impl Into<String>,
        tolerances: Tolerances,
        config: SessionConfig,
    ) -> Self {
        Self {
            decoder,
            snapshots,
            url: url.into(),
            tolerances,
            config,
        }
    }

    /// Stream URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start the session on a new task.
    pub fn spawn(self, cancel: CancellationToken) -> FollowerStreams {
        let (book_tx, books) = mpsc::channel(1);
        let (trade_tx, trades) = mpsc::channel(1);
        let (state_tx, state) = watch::channel(SessionState::Disconnected);

        let outputs = Outputs {
            books: book_tx,
            trades: trade_tx,
            state: state_tx,
        };
        let handle = tokio::spawn(self.run(outputs, cancel));

        FollowerStreams {
            books,
            trades,
            state,
            handle,
        }
    }

    #[instrument(skip_all, fields(url = %self.url))]
    async fn run(self, out: Outputs, cancel: CancellationToken) -> Result<()> {
        let result = self.follow(&out, &cancel).await;

        let reason = match &result {
            Ok(stop) => {
                info!(reason = stop.reason(), "Session finished");
                stop.reason()
            }
            Err(e) => {
                error!(error = %e, kind = e.kind(), "Session failed");
                e.kind()
            }
        };
        metrics::inc_sessions_closed(reason);
        out.transition(SessionState::Closed);

        // Dropping `out` closes both queues.
        result.map(|_| ())
    }

    async fn follow(&self, out: &Outputs, cancel: &CancellationToken) -> Result<Stop> {
        out.transition(SessionState::Disconnected);
        let mut primary = tokio::select! {
            _ = cancel.cancelled() => return Ok(Stop::Cancelled),
            conn = self.dial() => conn?,
        };

        out.transition(SessionState::Snapshotting);
        let seed = tokio::select! {
            _ = cancel.cancelled() => {
                retire(primary).await;
                return Ok(Stop::Cancelled);
            }
            seed = self.snapshots.fetch(&mut primary) => seed?,
        };
        info!(sequence = seed.sequence_id, connection = primary.id(), "Book seeded");

        let mut reconciler = Reconciler::from_seed(seed, self.tolerances)?;
        let mut handles = Handles {
            primary,
            standby: None,
        };

        out.transition(SessionState::Live);
        let result = match out.book(reconciler.snapshot(), cancel).await {
            Some(stop) => Ok(stop),
            None => self.live(&mut handles, &mut reconciler, out, cancel).await,
        };

        handles.close().await;
        result
    }

    async fn dial(&self) -> std::result::Result<Connection, WsError> {
        Connection::dial(
            &self.url,
            self.decoder.handshake(),
            self.config.connect_timeout,
        )
        .await
    }

    async fn live(
        &self,
        handles: &mut Handles,
        reconciler: &mut Reconciler,
        out: &Outputs,
        cancel: &CancellationToken,
    ) -> Result<Stop> {
        let SessionConfig {
            connection_lifetime: lifetime,
            rotation_overlap: overlap,
            idle_timeout,
            ..
        } = self.config;

        loop {
            if handles.rotation_due(lifetime) {
                out.transition(SessionState::Rotating);
                info!(
                    connection = handles.primary.id(),
                    age_s = handles.primary.age().as_secs(),
                    "Connection lifetime reached, dialing replacement"
                );
                let mut next = tokio::select! {
                    _ = cancel.cancelled() => return Ok(Stop::Cancelled),
                    conn = self.dial() => conn?,
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        retire(next).await;
                        return Ok(Stop::Cancelled);
                    }
                    ready = self.snapshots.prepare_standby(&mut next) => ready?,
                }
                handles.standby = Some(next);
            }

            if handles.standby_ready(overlap) {
                if let Some(old) = handles.promote() {
                    info!(
                        retired = old.id(),
                        primary = handles.primary.id(),
                        "Replacement connection promoted"
                    );
                    retire(old).await;
                    metrics::inc_connection_rotations();
                    out.transition(SessionState::Live);
                }
            }

            let wait = handles.next_deadline(lifetime, overlap);
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Stop::Cancelled),
                _ = tokio::time::sleep(wait) => continue,
                frame = handles.primary.next_text_within(idle_timeout) => frame,
            };

            let text = match frame? {
                Some(text) => text,
                None => {
                    warn!(connection = handles.primary.id(), "Stream ended");
                    return Err(WsError::ConnectionClosed {
                        code: None,
                        reason: "stream ended".to_string(),
                    }
                    .into());
                }
            };
            metrics::inc_ws_messages_received();

            if let Some(stop) = self.dispatch(&text, reconciler, out, cancel).await? {
                return Ok(stop);
            }
        }
    }

    /// Decode and reconcile one frame, then publish what it produced.
    async fn dispatch(
        &self,
        text: &str,
        reconciler: &mut Reconciler,
        out: &Outputs,
        cancel: &CancellationToken,
    ) -> Result<Option<Stop>> {
        let timer = metrics::timer_ws_message();
        let inbound = self.decoder.decode(text)?;

        let (book, trades) = match inbound {
            Inbound::KeepAlive => {
                trace!("Keep-alive");
                return Ok(None);
            }
            Inbound::Trade(trade) => (None, vec![trade]),
            Inbound::Book(update) => match reconciler.apply(update) {
                Ok(Reconciled::Stale) => {
                    metrics::inc_stale_updates();
                    return Ok(None);
                }
                Ok(Reconciled::Applied { book, trades }) => (book, trades),
                Err(e) => {
                    if matches!(e, BookError::Gap { .. }) {
                        metrics::inc_sequence_gaps();
                    }
                    return Err(e.into());
                }
            },
        };
        drop(timer);

        for trade in trades {
            if let Some(stop) = out.trade(trade, cancel).await {
                return Ok(Some(stop));
            }
        }
        if let Some(book) = book {
            debug!(sequence = book.sequence_id, "Publishing book");
            return Ok(out.book(book, cancel).await);
        }
        Ok(None)
    }
}
