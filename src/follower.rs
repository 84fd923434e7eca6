//! Builds a running session for a configured instrument.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{InstrumentConfig, SessionConfig};
use crate::error::{ConfigError, Result};
use crate::exchange::{luno, BinanceDecoder, BinanceSnapshot, Exchange, LunoDecoder, LunoSnapshot};
use crate::session::{FollowerStreams, SessionManager};

/// Start following `instrument`.
///
/// Configuration problems fail here, before any network activity.
pub fn spawn(
    instrument: &InstrumentConfig,
    session: SessionConfig,
    cancel: CancellationToken,
) -> Result<FollowerStreams> {
    info!(
        exchange = %instrument.exchange,
        symbol = %instrument.symbol,
        "Starting follower"
    );

    let streams = match instrument.exchange {
        Exchange::Binance => {
            let decoder = BinanceDecoder::new(&instrument.symbol);
            let url = decoder.stream_url(&instrument.ws_url);
            let snapshots = BinanceSnapshot::new(instrument, session.http_timeout)?;
            SessionManager::new(decoder, snapshots, url, instrument.tolerances, session)
                .spawn(cancel)
        }
        Exchange::Luno => {
            let credentials = instrument.credentials.clone().ok_or_else(|| {
                ConfigError::Invalid("luno requires API credentials".to_string())
            })?;
            let url = luno::stream_url(&instrument.ws_url, &instrument.symbol);
            SessionManager::new(
                LunoDecoder::new(credentials),
                LunoSnapshot::new(session.idle_timeout),
                url,
                instrument.tolerances,
                session,
            )
            .spawn(cancel)
        }
    };

    Ok(streams)
}
