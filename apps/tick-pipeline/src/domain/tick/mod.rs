//! Simulated Ticks
//!
//! A [`Ticker`] is the streaming baseline for one symbol (base price and
//! volume). The [`TickGenerator`] derives synthetic [`Tick`]s from it by
//! applying a bounded uniform jitter to the base price.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

use super::events::{DEFAULT_STREAM_TYPE, parse_timestamp};

/// Default jitter fraction (±0.5%).
pub const DEFAULT_JITTER: f64 = 0.005;

/// Streaming baseline for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// Ticker symbol.
    pub symbol: String,
    /// Price the jitter is applied to.
    pub base_price: f64,
    /// Volume reported with every tick.
    pub volume: u64,
}

impl Ticker {
    /// Create a ticker.
    #[must_use]
    pub fn new(symbol: impl Into<String>, base_price: f64, volume: u64) -> Self {
        Self {
            symbol: symbol.into(),
            base_price,
            volume,
        }
    }
}

/// A single price tick.
///
/// Also the JSON record exchanged with the receiver over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Ticker symbol.
    pub symbol: String,
    /// Tick price.
    pub price: f64,
    /// Difference from the base price.
    #[serde(default, alias = "change")]
    pub price_change: Option<f64>,
    /// Reported volume.
    pub volume: u64,
    /// Generation time. Offset-less ISO times are read as UTC.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Stream label.
    #[serde(default = "default_stream_type", alias = "tick_type")]
    pub stream_type: String,
    /// Sequence number within the streaming session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_number: Option<u64>,
}

fn default_stream_type() -> String {
    DEFAULT_STREAM_TYPE.to_string()
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Produces jittered ticks from tickers.
#[derive(Debug, Clone, Copy)]
pub struct TickGenerator {
    jitter: f64,
}

impl Default for TickGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER)
    }
}

impl TickGenerator {
    /// Create a generator with the given jitter fraction.
    ///
    /// Non-finite or negative values fall back to [`DEFAULT_JITTER`].
    #[must_use]
    pub fn new(jitter: f64) -> Self {
        let jitter = if jitter.is_finite() && jitter >= 0.0 {
            jitter
        } else {
            DEFAULT_JITTER
        };
        Self { jitter }
    }

    /// Configured jitter fraction.
    #[must_use]
    pub const fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Generate a tick using the thread-local RNG.
    #[must_use]
    pub fn generate(&self, ticker: &Ticker, tick_number: u64) -> Tick {
        self.generate_with(&mut rand::rng(), ticker, tick_number)
    }

    /// Generate a tick using the supplied RNG.
    ///
    /// `price = base * (1 + u)` with `u` uniform in `[-jitter, +jitter]`.
    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        ticker: &Ticker,
        tick_number: u64,
    ) -> Tick {
        let change_fraction = if self.jitter > 0.0 {
            rng.random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        let price_change = ticker.base_price * change_fraction;

        Tick {
            symbol: ticker.symbol.clone(),
            price: ticker.base_price + price_change,
            price_change: Some(price_change),
            volume: ticker.volume,
            timestamp: Utc::now(),
            stream_type: default_stream_type(),
            tick_number: Some(tick_number),
        }
    }
}
