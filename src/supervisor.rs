//! Restarts failed sessions from a fresh snapshot.
//!
//! A session never repairs itself. The supervisor owns the restart policy:
//! after any termination it waits out an exponential backoff, starts a new
//! session and keeps forwarding into the same pair of output queues.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{InstrumentConfig, SessionConfig};
use crate::error::{FollowerError, Result};
use crate::follower;
use crate::metrics;
use crate::orderbook::{OrderBookSnapshot, Trade};
use crate::session::{FollowerStreams, SessionState};

/// Backoff between session restarts.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_s: 30,
            backoff_multiplier: 2.0,
        }
    }
}

impl RestartPolicy {
    /// Create from config values.
    pub fn from_config(max_delay_s: u64) -> Self {
        Self {
            max_delay_s,
            ..Default::default()
        }
    }

    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let max_delay_ms = self.max_delay_s * 1000;
        let clamped_ms = delay_ms.min(max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }
}

/// Follow `instrument` indefinitely, restarting after every session failure.
pub fn follow_with_restart(
    instrument: InstrumentConfig,
    session: SessionConfig,
    policy: RestartPolicy,
    cancel: CancellationToken,
) -> FollowerStreams {
    supervise(
        move |token| follower::spawn(&instrument, session, token),
        policy,
        cancel,
    )
}

/// Run sessions produced by `start` until cancelled.
///
/// Returns stable queues that outlive individual sessions. A configuration
/// error from `start` is not retried.
pub fn supervise<F>(start: F, policy: RestartPolicy, cancel: CancellationToken) -> FollowerStreams
where
    F: FnMut(CancellationToken) -> Result<FollowerStreams> + Send + 'static,
{
    let (book_tx, books) = mpsc::channel(1);
    let (trade_tx, trades) = mpsc::channel(1);
    let (state_tx, state) = watch::channel(SessionState::Disconnected);

    let out = Relay {
        books: book_tx,
        trades: trade_tx,
        state: state_tx,
    };
    let handle = tokio::spawn(run(start, policy, out, cancel));

    FollowerStreams {
        books,
        trades,
        state,
        handle,
    }
}

struct Relay {
    books: mpsc::Sender<OrderBookSnapshot>,
    trades: mpsc::Sender<Trade>,
    state: watch::Sender<SessionState>,
}

impl Relay {
    fn abandoned(&self) -> bool {
        self.books.is_closed() && self.trades.is_closed()
    }
}

/// How forwarding from one session ended.
#[derive(Debug, PartialEq, Eq)]
enum Forwarded {
    Cancelled,
    ConsumersGone,
    /// The session closed its queues; `published` is whether anything got through.
    SessionEnded { published: bool },
}

async fn run<F>(
    mut start: F,
    policy: RestartPolicy,
    out: Relay,
    cancel: CancellationToken,
) -> Result<()>
where
    F: FnMut(CancellationToken) -> Result<FollowerStreams> + Send + 'static,
{
    let mut attempt = 0u32;

    let result = loop {
        let session_cancel = cancel.child_token();
        match start(session_cancel.clone()) {
            Ok(mut inner) => {
                let forwarded = forward(&mut inner, &out, &cancel).await;
                if !matches!(forwarded, Forwarded::SessionEnded { .. }) {
                    session_cancel.cancel();
                }

                match inner.handle.await {
                    Ok(Ok(())) => info!("Session ended"),
                    Ok(Err(e @ FollowerError::Config(_))) => break Err(e),
                    Ok(Err(e)) => warn!(error = %e, kind = e.kind(), "Session terminated"),
                    Err(e) => error!(error = %e, "Session task panicked"),
                }

                match forwarded {
                    Forwarded::Cancelled | Forwarded::ConsumersGone => break Ok(()),
                    Forwarded::SessionEnded { published: true } => attempt = 0,
                    Forwarded::SessionEnded { published: false } => {}
                }
            }
            Err(e @ FollowerError::Config(_)) => break Err(e),
            Err(e) => warn!(error = %e, "Failed to start session"),
        }

        if cancel.is_cancelled() || out.abandoned() {
            break Ok(());
        }

        let delay = policy.next_delay(attempt);
        attempt = attempt.saturating_add(1);
        metrics::inc_session_restarts();
        info!(delay_ms = delay.as_millis() as u64, attempt, "Restarting session after delay");

        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "Supervisor stopped");
    }
    out.state.send_replace(SessionState::Closed);
    result
}

/// Copy one session's output into the stable queues until it ends.
async fn forward(
    inner: &mut FollowerStreams,
    out: &Relay,
    cancel: &CancellationToken,
) -> Forwarded {
    let mut books_open = true;
    let mut trades_open = true;
    let mut published = false;

    while books_open || trades_open {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Forwarded::Cancelled,
            Ok(()) = inner.state.changed() => {
                let state = *inner.state.borrow_and_update();
                out.state.send_replace(state);
            }
            book = inner.books.recv(), if books_open => match book {
                Some(book) => {
                    published = true;
                    if relay(&out.books, book, cancel).await {
                        return Forwarded::Cancelled;
                    }
                }
                None => books_open = false,
            },
            trade = inner.trades.recv(), if trades_open => match trade {
                Some(trade) => {
                    published = true;
                    if relay(&out.trades, trade, cancel).await {
                        return Forwarded::Cancelled;
                    }
                }
                None => trades_open = false,
            },
        }

        if out.abandoned() {
            return Forwarded::ConsumersGone;
        }
    }

    Forwarded::SessionEnded { published }
}

/// Send `value` unless the receiver is gone. Returns true if cancelled.
async fn relay<T>(tx: &mpsc::Sender<T>, value: T, cancel: &CancellationToken) -> bool {
    if tx.is_closed() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = tx.send(value) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, WsError};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use time::OffsetDateTime;

    fn fast_policy() -> RestartPolicy {
        RestartPolicy {
            initial_delay_ms: 1,
            max_delay_s: 1,
            backoff_multiplier: 1.0,
        }
    }

    /// A session that publishes one book and then fails.
    fn failing_session(sequence_id: i64, cancel: CancellationToken) -> FollowerStreams {
        let (book_tx, books) = mpsc::channel(1);
        let (trade_tx, trades) = mpsc::channel(1);
        let (state_tx, state) = watch::channel(SessionState::Live);

        let handle = tokio::spawn(async move {
            let _trades = trade_tx;
            let _state = state_tx;
            let book = OrderBookSnapshot::from_unsorted(
                OffsetDateTime::UNIX_EPOCH,
                sequence_id,
                vec![],
                vec![],
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = book_tx.send(book) => {}
            }
            Err(WsError::ReadTimeout(Duration::from_secs(1)).into())
        });

        FollowerStreams {
            books,
            trades,
            state,
            handle,
        }
    }

    #[test]
    fn next_delay_grows_and_clamps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.next_delay(0), Duration::from_secs(1));
        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
        assert_eq!(policy.next_delay(10), Duration::from_secs(30));
        assert_eq!(RestartPolicy::from_config(5).next_delay(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn failed_sessions_are_restarted_into_the_same_queue() {
        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicI64::new(0));
        let counter = started.clone();

        let mut streams = supervise(
            move |token| Ok(failing_session(counter.fetch_add(1, Ordering::SeqCst), token)),
            fast_policy(),
            cancel.clone(),
        );

        for expected in 0..3 {
            let book = streams.books.recv().await.unwrap();
            assert_eq!(book.sequence_id, expected);
        }

        cancel.cancel();
        assert!(streams.handle.await.unwrap().is_ok());
        assert!(started.load(Ordering::SeqCst) >= 3);
        assert_eq!(*streams.state.borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn config_errors_are_not_retried() {
        let mut streams = supervise(
            |_| Err(ConfigError::Invalid("bad".to_string()).into()),
            fast_policy(),
            CancellationToken::new(),
        );

        assert!(streams.books.recv().await.is_none());
        assert!(matches!(
            streams.handle.await.unwrap(),
            Err(FollowerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn dropping_both_queues_stops_the_supervisor() {
        let cancel = CancellationToken::new();
        let streams = supervise(
            |token| Ok(failing_session(1, token)),
            fast_policy(),
            cancel,
        );

        let FollowerStreams {
            books,
            trades,
            handle,
            ..
        } = streams;
        drop(books);
        drop(trades);

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
