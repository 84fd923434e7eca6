//! End-to-end: local WebSocket server → session → output queues.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use market_follower::config::{ApiCredentials, SessionConfig};
use market_follower::error::{BookError, FollowerError, WsError};
use market_follower::exchange::{
    BinanceDecoder, LunoDecoder, LunoSnapshot, StaticSnapshot, StaticSnapshotBuilder,
};
use market_follower::orderbook::{PriceLevel, Side, Tolerances};
use market_follower::session::{SessionManager, SessionState};

/// Counters observed by the scripted server.
#[derive(Clone, Default)]
struct ServerStats {
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

/// Serve `script(n)` to the n-th connection, then hold it open until the
/// client goes away.
async fn spawn_server<F>(script: F) -> (String, ServerStats)
where
    F: Fn(usize) -> Vec<String> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = ServerStats::default();
    let script = Arc::new(script);

    tokio::spawn({
        let stats = stats.clone();
        async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let n = stats.accepted.fetch_add(1, Ordering::SeqCst);
                let frames = script(n);
                let closed = stats.closed.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(tcp).await else {
                        return;
                    };
                    for frame in frames {
                        if ws.send(Message::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_close() {
                            break;
                        }
                    }
                    closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
    });

    (format!("ws://{addr}"), stats)
}

fn depth(first: i64, last: i64, bids: &[[&str; 2]], asks: &[[&str; 2]]) -> String {
    json!({
        "stream": "btceur@depth",
        "data": {"e": "depthUpdate", "E": 1_700_000_000_000_i64, "U": first, "u": last, "b": bids, "a": asks}
    })
    .to_string()
}

fn trade(price: &str, quantity: &str, buyer_is_maker: bool) -> String {
    json!({
        "stream": "btceur@trade",
        "data": {"e": "trade", "E": 1_700_000_000_500_i64, "p": price, "q": quantity, "m": buyer_is_maker}
    })
    .to_string()
}

fn luno_snapshot(sequence: i64) -> String {
    json!({
        "sequence": sequence.to_string(),
        "bids": [{"id": "seed-bid", "price": "99.00", "volume": "1"}],
        "asks": [{"id": "seed-ask", "price": "101.00", "volume": "1"}],
        "timestamp": 1_700_000_000_000_i64
    })
    .to_string()
}

fn luno_create(sequence: i64) -> String {
    json!({
        "sequence": sequence.to_string(),
        "create_update": {"order_id": format!("bid-{sequence}"), "type": "BID", "price": "100.00", "volume": "1"},
        "timestamp": 1_700_000_000_000_i64 + sequence
    })
    .to_string()
}

fn luno_decoder() -> LunoDecoder {
    LunoDecoder::new(ApiCredentials {
        key_id: "key".into(),
        secret: "secret".into(),
    })
}

fn session_config() -> SessionConfig {
    SessionConfig {
        connection_lifetime: Duration::from_secs(3600),
        rotation_overlap: Duration::from_millis(50),
        idle_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        http_timeout: Duration::from_secs(5),
    }
}

fn tolerances() -> Tolerances {
    Tolerances::from_ticks(dec!(0.01), dec!(0.00000001))
}

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

fn binance_session(
    base: &str,
    seed_asks: &[(rust_decimal::Decimal, rust_decimal::Decimal)],
    config: SessionConfig,
) -> SessionManager<BinanceDecoder, StaticSnapshot> {
    let decoder = BinanceDecoder::new("BTCEUR");
    let url = decoder.stream_url(base);
    let mut snapshot = StaticSnapshotBuilder::new(100).bid(dec!(100), dec!(1.0));
    for (price, volume) in seed_asks {
        snapshot = snapshot.ask(*price, *volume);
    }
    SessionManager::new(decoder, snapshot.build(), url, tolerances(), config)
}

#[tokio::test]
async fn applies_diffs_and_discards_duplicates() {
    let (base, _) = spawn_server(|_| {
        let diff = depth(101, 101, &[["100", "0"]], &[["102", "0.5"]]);
        vec![
            diff.clone(),
            diff,
            trade("101.00", "0.25", true),
            depth(102, 102, &[], &[["101", "2"]]),
        ]
    })
    .await;

    let cancel = CancellationToken::new();
    let mut streams =
        binance_session(&base, &[(dec!(101), dec!(1.0))], session_config()).spawn(cancel.clone());

    let seeded = within(streams.books.recv()).await.unwrap();
    assert_eq!(seeded.sequence_id, 100);
    assert_eq!(seeded.best_bid(), Some(dec!(100)));

    let first = within(streams.books.recv()).await.unwrap();
    assert_eq!(first.sequence_id, 101);
    assert!(first.bids.is_empty());
    assert_eq!(
        first.asks,
        vec![
            PriceLevel::new(dec!(101), dec!(1.0)),
            PriceLevel::new(dec!(102), dec!(0.5)),
        ]
    );

    // The duplicate of 101 publishes nothing; the next book is 102.
    let second = within(streams.books.recv()).await.unwrap();
    assert_eq!(second.sequence_id, 102);
    assert_eq!(second.asks[0], PriceLevel::new(dec!(101), dec!(2)));

    let print = within(streams.trades.recv()).await.unwrap();
    assert_eq!(print.maker_side, Side::Bid);
    assert_eq!(print.price, dec!(101));
    assert_eq!(print.volume, dec!(0.25));

    cancel.cancel();
    assert!(within(streams.handle).await.unwrap().is_ok());
    assert!(streams.books.recv().await.is_none());
    assert!(streams.trades.recv().await.is_none());
    assert_eq!(*streams.state.borrow(), SessionState::Closed);
}

#[tokio::test]
async fn gap_closes_the_session() {
    let (base, _) = spawn_server(|_| vec![depth(103, 104, &[["99", "1"]], &[])]).await;

    let mut streams = binance_session(&base, &[(dec!(101), dec!(1.0))], session_config())
        .spawn(CancellationToken::new());

    assert_eq!(within(streams.books.recv()).await.unwrap().sequence_id, 100);
    assert!(within(streams.books.recv()).await.is_none());

    let result = within(streams.handle).await.unwrap();
    assert!(matches!(
        result,
        Err(FollowerError::Book(BookError::Gap {
            last_applied: 100,
            first_id: 103
        }))
    ));
    assert_eq!(*streams.state.borrow(), SessionState::Closed);
}

#[tokio::test]
async fn decode_error_closes_the_session() {
    let (base, _) = spawn_server(|_| vec![r#"{"stream": "btceur@depth", "data": {"U": "x"}}"#.to_string()]).await;

    let mut streams = binance_session(&base, &[], session_config()).spawn(CancellationToken::new());

    assert_eq!(within(streams.books.recv()).await.unwrap().sequence_id, 100);
    assert!(within(streams.books.recv()).await.is_none());
    assert!(matches!(
        within(streams.handle).await.unwrap(),
        Err(FollowerError::Decode(_))
    ));
}

#[tokio::test]
async fn rotation_preserves_sequence_continuity() {
    // Every connection replays the same logical stream 101..=110.
    let (base, server) = spawn_server(|_| {
        (101..=110)
            .map(|id| {
                let volume = (id - 100).to_string();
                depth(id, id, &[], &[["101", volume.as_str()]])
            })
            .collect()
    })
    .await;

    let config = SessionConfig {
        connection_lifetime: Duration::from_millis(300),
        ..session_config()
    };
    let cancel = CancellationToken::new();
    let mut streams =
        binance_session(&base, &[(dec!(101), dec!(0.5))], config).spawn(cancel.clone());

    let mut last = 0;
    while last < 110 {
        let book = within(streams.books.recv()).await.unwrap();
        assert!(book.sequence_id > last, "books must be strictly increasing");
        last = book.sequence_id;
    }
    assert_eq!(last, 110);

    // Wait for a replacement to be dialed and the old connection retired.
    within(async {
        while server.closed.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(server.accepted.load(Ordering::SeqCst) >= 2);

    // Replayed updates on the new primary are stale.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), streams.books.recv())
            .await
            .is_err(),
        "no book may follow the replayed stream"
    );
    assert!(!streams.handle.is_finished());

    cancel.cancel();
    assert!(within(streams.handle).await.unwrap().is_ok());
}

#[tokio::test]
async fn cancellation_unblocks_a_full_queue() {
    let (base, _) = spawn_server(|_| {
        (101..=105)
            .map(|id| {
                let price = (id - 10).to_string();
                depth(id, id, &[[price.as_str(), "1"]], &[])
            })
            .collect()
    })
    .await;

    let cancel = CancellationToken::new();
    let streams = binance_session(&base, &[], session_config()).spawn(cancel.clone());

    // Nobody reads; the worker stalls on the second book.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!streams.handle.is_finished());

    cancel.cancel();
    assert!(within(streams.handle).await.unwrap().is_ok());
}

#[tokio::test]
async fn order_keyed_stream_resolves_trades() {
    let (base, _) = spawn_server(|_| {
        vec![
            "\"\"".to_string(),
            json!({
                "sequence": "6",
                "trade_updates": [{"base": "0.4", "counter": "40.4", "maker_order_id": "ask-1", "taker_order_id": "t"}],
                "create_update": null,
                "delete_update": null,
                "timestamp": 1_700_000_000_000_i64
            })
            .to_string(),
            json!({
                "sequence": "7",
                "create_update": {"order_id": "bid-2", "type": "BID", "price": "100.00", "volume": "2"},
                "timestamp": 1_700_000_000_100_i64
            })
            .to_string(),
        ]
    })
    .await;

    let snapshots = StaticSnapshotBuilder::new(5)
        .order("bid-1", Side::Bid, dec!(100), dec!(1))
        .order("ask-1", Side::Ask, dec!(101), dec!(1))
        .build();
    let url = format!("{base}/api/1/stream/XBTEUR");

    let cancel = CancellationToken::new();
    let mut streams =
        SessionManager::new(luno_decoder(), snapshots, url, tolerances(), session_config())
            .spawn(cancel.clone());

    assert_eq!(within(streams.books.recv()).await.unwrap().sequence_id, 5);

    let print = within(streams.trades.recv()).await.unwrap();
    assert_eq!(print.maker_side, Side::Ask);
    assert_eq!(print.price, dec!(101));
    assert_eq!(print.volume, dec!(0.4));

    let after_trade = within(streams.books.recv()).await.unwrap();
    assert_eq!(after_trade.sequence_id, 6);
    assert_eq!(after_trade.asks, vec![PriceLevel::new(dec!(101), dec!(0.6))]);

    let after_create = within(streams.books.recv()).await.unwrap();
    assert_eq!(after_create.sequence_id, 7);
    assert_eq!(after_create.bids, vec![PriceLevel::new(dec!(100), dec!(3))]);

    cancel.cancel();
    assert!(within(streams.handle).await.unwrap().is_ok());
}

#[tokio::test]
async fn silent_stream_times_out_while_snapshotting() {
    let (base, _) = spawn_server(|_| Vec::new()).await;

    let config = SessionConfig {
        idle_timeout: Duration::from_millis(200),
        ..session_config()
    };
    let url = format!("{base}/api/1/stream/XBTEUR");
    let mut streams = SessionManager::new(
        luno_decoder(),
        LunoSnapshot::new(config.idle_timeout),
        url,
        tolerances(),
        config,
    )
    .spawn(CancellationToken::new());

    assert!(matches!(
        within(streams.handle).await.unwrap(),
        Err(FollowerError::WebSocket(WsError::ReadTimeout(_)))
    ));
    assert!(streams.books.recv().await.is_none());
    assert_eq!(*streams.state.borrow(), SessionState::Closed);
}

#[tokio::test]
async fn order_keyed_rotation_discards_standby_snapshot() {
    // Connection n snapshots at 5 + 4n and then streams the next five
    // updates, so each replacement overlaps its predecessor by one.
    let (base, server) = spawn_server(|n| {
        let snapshot = 5 + 4 * n as i64;
        let mut frames = vec!["\"\"".to_string(), luno_snapshot(snapshot)];
        frames.extend((snapshot + 1..=snapshot + 5).map(luno_create));
        frames
    })
    .await;

    let config = SessionConfig {
        connection_lifetime: Duration::from_millis(300),
        ..session_config()
    };
    let url = format!("{base}/api/1/stream/XBTEUR");
    let cancel = CancellationToken::new();
    let mut streams = SessionManager::new(
        luno_decoder(),
        LunoSnapshot::new(config.idle_timeout),
        url,
        tolerances(),
        config,
    )
    .spawn(cancel.clone());

    let seeded = within(streams.books.recv()).await.unwrap();
    assert_eq!(seeded.sequence_id, 5);

    let mut book = seeded;
    while book.sequence_id < 18 {
        let next = within(streams.books.recv()).await.unwrap();
        assert_eq!(next.sequence_id, book.sequence_id + 1, "sequence must stay contiguous");
        book = next;
    }

    // Updates 6..=18 each rested one bid at 100.
    assert_eq!(
        book.bids,
        vec![
            PriceLevel::new(dec!(100), dec!(13)),
            PriceLevel::new(dec!(99), dec!(1)),
        ]
    );
    assert!(server.accepted.load(Ordering::SeqCst) >= 3);
    assert!(!streams.handle.is_finished());

    cancel.cancel();
    assert!(within(streams.handle).await.unwrap().is_ok());
}
