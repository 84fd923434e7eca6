//! Application configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::exchange::{Exchange, Pair};
use crate::orderbook::Tolerances;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Instrument ===
    /// Exchange to follow.
    #[serde(default)]
    pub exchange: Exchange,

    /// Trading pair to follow.
    #[serde(default)]
    pub pair: Pair,

    /// Override for the price equality tolerance.
    #[serde(default)]
    pub price_tolerance: Option<Decimal>,

    /// Override for the volume zero tolerance.
    #[serde(default)]
    pub volume_tolerance: Option<Decimal>,

    // === Connection Lifecycle ===
    /// Maximum age of a streaming connection before it is rotated.
    #[serde(default = "default_connection_lifetime")]
    pub connection_lifetime_secs: u64,

    /// How long a replacement connection stays open before taking over.
    #[serde(default = "default_rotation_overlap")]
    pub rotation_overlap_ms: u64,

    /// A connection silent for this long is treated as dead.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// WebSocket dial timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// REST snapshot request timeout.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,

    /// Upper bound on the delay between session restarts.
    #[serde(default = "default_restart_max_delay")]
    pub restart_max_delay_secs: u64,

    // === Statistics ===
    /// Retention of the moving window statistics.
    #[serde(default = "default_stats_retention")]
    pub stats_retention_secs: u64,

    /// Period between statistics reports.
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// Base volume used for the price-per-volume statistics.
    #[serde(default = "default_volume_price_depth")]
    pub volume_price_depth: Decimal,

    // === Endpoints ===
    /// Binance WebSocket base URL.
    #[serde(default = "default_binance_ws_url")]
    pub binance_ws_url: String,

    /// Binance REST base URL.
    #[serde(default = "default_binance_rest_url")]
    pub binance_rest_url: String,

    /// Luno WebSocket base URL.
    #[serde(default = "default_luno_ws_url")]
    pub luno_ws_url: String,

    // === Credentials ===
    /// Luno API key id (the Luno stream requires authentication).
    #[serde(default)]
    pub luno_api_key_id: Option<String>,

    /// Luno API key secret.
    #[serde(default)]
    pub luno_api_key_secret: Option<String>,

    // === Logging ===
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_connection_lifetime() -> u64 {
    55 * 60
}

fn default_rotation_overlap() -> u64 {
    1000
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_http_timeout() -> u64 {
    5_000
}

fn default_restart_max_delay() -> u64 {
    30
}

fn default_stats_retention() -> u64 {
    60 * 60
}

fn default_report_interval() -> u64 {
    10
}

fn default_volume_price_depth() -> Decimal {
    Decimal::ONE
}

fn default_binance_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_binance_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_luno_ws_url() -> String {
    "wss://ws.luno.com".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: Exchange::default(),
            pair: Pair::default(),
            price_tolerance: None,
            volume_tolerance: None,
            connection_lifetime_secs: default_connection_lifetime(),
            rotation_overlap_ms: default_rotation_overlap(),
            idle_timeout_secs: default_idle_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            http_timeout_ms: default_http_timeout(),
            restart_max_delay_secs: default_restart_max_delay(),
            stats_retention_secs: default_stats_retention(),
            report_interval_secs: default_report_interval(),
            volume_price_depth: default_volume_price_depth(),
            binance_ws_url: default_binance_ws_url(),
            binance_rest_url: default_binance_rest_url(),
            luno_ws_url: default_luno_ws_url(),
            luno_api_key_id: None,
            luno_api_key_secret: None,
            rust_log: default_log_level(),
        }
    }
}

/// API key pair sent when a stream requires authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    /// Key id.
    pub key_id: String,
    /// Key secret.
    pub secret: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Everything needed to follow one instrument on one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentConfig {
    /// Exchange.
    pub exchange: Exchange,
    /// Pair.
    pub pair: Pair,
    /// Exchange symbol.
    pub symbol: String,
    /// Price/volume tolerances.
    pub tolerances: Tolerances,
    /// Streaming endpoint base URL.
    pub ws_url: String,
    /// REST endpoint base URL, for exchanges with REST snapshots.
    pub rest_url: Option<String>,
    /// Stream authentication.
    pub credentials: Option<ApiCredentials>,
}

/// Connection lifecycle parameters for a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Rotate connections older than this.
    pub connection_lifetime: Duration,
    /// Overlap before the replacement connection takes over.
    pub rotation_overlap: Duration,
    /// Fail the session after this long without a frame.
    pub idle_timeout: Duration,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// REST request timeout.
    pub http_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session()
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_lifetime_secs == 0 {
            return Err(ConfigError::Invalid(
                "CONNECTION_LIFETIME_SECS must be positive".to_string(),
            ));
        }

        let lifetime_ms = self
            .connection_lifetime_secs
            .checked_mul(1000)
            .ok_or_else(|| {
                ConfigError::Invalid("CONNECTION_LIFETIME_SECS is too large".to_string())
            })?;
        if self.rotation_overlap_ms >= lifetime_ms {
            return Err(ConfigError::Invalid(
                "ROTATION_OVERLAP_MS must be shorter than the connection lifetime".to_string(),
            ));
        }

        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "IDLE_TIMEOUT_SECS must be positive".to_string(),
            ));
        }

        if self.stats_retention_secs == 0 {
            return Err(ConfigError::Invalid(
                "STATS_RETENTION_SECS must be positive".to_string(),
            ));
        }

        if self.volume_price_depth <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "VOLUME_PRICE_DEPTH must be positive".to_string(),
            ));
        }

        for (name, tolerance) in [
            ("PRICE_TOLERANCE", self.price_tolerance),
            ("VOLUME_TOLERANCE", self.volume_tolerance),
        ] {
            if matches!(tolerance, Some(t) if t <= Decimal::ZERO) {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }

        Ok(())
    }

    /// Resolve the configured exchange/pair into an instrument.
    ///
    /// Fails before any network activity if the exchange does not list the
    /// pair.
    pub fn instrument(&self) -> Result<InstrumentConfig, ConfigError> {
        let listing = self.exchange.listing(self.pair).ok_or_else(|| {
            ConfigError::UnsupportedInstrument {
                exchange: self.exchange.to_string(),
                pair: self.pair.to_string(),
            }
        })?;

        let derived = Tolerances::from_ticks(listing.price_tick, listing.volume_tick);
        let tolerances = Tolerances::new(
            self.price_tolerance.unwrap_or(derived.price),
            self.volume_tolerance.unwrap_or(derived.volume),
        );

        let (ws_url, rest_url, credentials) = match self.exchange {
            Exchange::Binance => (
                self.binance_ws_url.clone(),
                Some(self.binance_rest_url.clone()),
                None,
            ),
            Exchange::Luno => {
                let credentials = match (&self.luno_api_key_id, &self.luno_api_key_secret) {
                    (Some(key_id), Some(secret)) => Some(ApiCredentials {
                        key_id: key_id.clone(),
                        secret: secret.clone(),
                    }),
                    _ => {
                        return Err(ConfigError::Invalid(
                            "LUNO_API_KEY_ID and LUNO_API_KEY_SECRET are required for luno"
                                .to_string(),
                        ))
                    }
                };
                (self.luno_ws_url.clone(), None, credentials)
            }
        };

        Ok(InstrumentConfig {
            exchange: self.exchange,
            pair: self.pair,
            symbol: listing.symbol.to_string(),
            tolerances,
            ws_url,
            rest_url,
            credentials,
        })
    }

    /// Connection lifecycle parameters.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            connection_lifetime: Duration::from_secs(self.connection_lifetime_secs),
            rotation_overlap: Duration::from_millis(self.rotation_overlap_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            http_timeout: Duration::from_millis(self.http_timeout_ms),
        }
    }

    /// Retention of the moving window statistics.
    pub fn stats_retention(&self) -> Duration {
        Duration::from_secs(self.stats_retention_secs)
    }

    /// Period between statistics reports.
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }
}
