//! Exchange order book follower entry point.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_follower::config::Config;
use market_follower::exchange::{Exchange, Pair};
use market_follower::metrics;
use market_follower::session::FollowerStreams;
use market_follower::stats::MarketStats;
use market_follower::supervisor::{follow_with_restart, RestartPolicy};
use market_follower::utils::cancel_on_shutdown;

/// Trailing window summarised in each report.
const REPORT_WINDOW: Duration = Duration::from_secs(60);

/// Exchange order book follower.
#[derive(Parser, Debug)]
#[command(name = "market-follower")]
#[command(about = "Follow an exchange order book and log short-horizon market statistics")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the configured instrument (default).
    Run {
        /// Exchange override (binance, luno).
        #[arg(long)]
        exchange: Option<Exchange>,

        /// Pair override (e.g. btceur).
        #[arg(long)]
        pair: Option<Pair>,

        /// Serve Prometheus metrics on this port.
        #[arg(long)]
        metrics_port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("market_follower=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::Run {
            exchange,
            pair,
            metrics_port,
        }) => cmd_run(exchange, pair, metrics_port).await,
        None => cmd_run(None, None, None).await,
    }
}

/// Load config, apply CLI overrides and validate.
fn load_config(exchange: Option<Exchange>, pair: Option<Pair>) -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    if let Some(exchange) = exchange {
        config.exchange = exchange;
    }
    if let Some(pair) = pair {
        config.pair = pair;
    }
    config.validate()?;
    Ok(config)
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("MARKET FOLLOWER - CONFIGURATION CHECK");
    println!("======================================================================");

    let config = load_config(None, None)?;
    let instrument = config.instrument()?;
    let session = config.session();

    println!("  Exchange: {}", instrument.exchange);
    println!("  Pair: {} ({})", instrument.pair, instrument.symbol);
    println!("  Price tolerance: {}", instrument.tolerances.price);
    println!("  Volume tolerance: {}", instrument.tolerances.volume);
    println!("  Stream: {}", instrument.ws_url);
    if let Some(rest) = &instrument.rest_url {
        println!("  Snapshot: {}", rest);
    }
    println!("  Connection lifetime: {:?}", session.connection_lifetime);
    println!("  Rotation overlap: {:?}", session.rotation_overlap);
    println!("  Stats retention: {:?}", config.stats_retention());
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Follow the instrument and log statistics until shutdown.
async fn cmd_run(
    exchange: Option<Exchange>,
    pair: Option<Pair>,
    metrics_port: Option<u16>,
) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let config = load_config(exchange, pair).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let instrument = config.instrument()?;

    if let Some(port) = metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "Prometheus exporter listening");
    }
    metrics::init_metrics();

    info!(
        exchange = %instrument.exchange,
        pair = %instrument.pair,
        symbol = %instrument.symbol,
        "Following market"
    );

    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    let FollowerStreams {
        books,
        trades,
        mut state,
        mut handle,
    } = follow_with_restart(
        instrument,
        config.session(),
        RestartPolicy::from_config(config.restart_max_delay_secs),
        cancel.clone(),
    );

    let stats = MarketStats::new(config.stats_retention(), config.volume_price_depth);
    let feeder = stats.spawn_feeder(books, trades, cancel.clone());

    let window = REPORT_WINDOW.min(config.stats_retention());
    let mut ticker = tokio::time::interval(config.report_interval());
    ticker.tick().await;

    let outcome = loop {
        tokio::select! {
            result = &mut handle => break result,
            _ = ticker.tick() => {
                let current = *state.borrow_and_update();
                match stats.report(window) {
                    Ok(report) => info!(state = %current, "{}", report),
                    Err(e) => warn!(error = %e, "Statistics unavailable"),
                }
            }
        }
    };

    cancel.cancel();
    if let Err(e) = feeder.await {
        warn!(error = %e, "Statistics feeder task failed");
    }

    match outcome {
        Ok(Ok(())) => {
            info!("Shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(e.into()),
    }
}
