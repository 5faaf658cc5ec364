//! Pipeline Configuration Settings
//!
//! Configuration types for the pipeline, loaded from environment variables.
//! Unparseable numeric values fall back to their defaults; values that parse
//! but violate a constraint are rejected with [`ConfigError::Invalid`].

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::tick::{DEFAULT_JITTER, Ticker};

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// REST/WebSocket/health port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8002 }
    }
}

/// Event transport settings.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Topic events are published to. `None` disables publishing.
    pub topic: Option<String>,
    /// Queue events are received from. `None` disables listening.
    pub queue: Option<String>,
    /// Notification gateway URL. `None` selects the in-memory bus.
    pub bus_url: Option<String>,
    /// Listener poll interval.
    pub poll_interval: Duration,
    /// Messages per poll.
    pub poll_batch: usize,
    /// Bound on joining the listener task.
    pub listener_stop_timeout: Duration,
    /// Dispatcher history ring size.
    pub history_capacity: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            topic: Some("pipeline-events".to_string()),
            queue: Some("pipeline-events-driver".to_string()),
            bus_url: None,
            poll_interval: Duration::from_secs(30),
            poll_batch: 10,
            listener_stop_timeout: Duration::from_secs(5),
            history_capacity: 1_000,
        }
    }
}

/// Threshold and tick loop settings.
#[derive(Debug, Clone)]
pub struct StreamingSettings {
    /// Ready symbols required before streaming.
    pub threshold: usize,
    /// Sleep between sweeps.
    pub tick_interval: Duration,
    /// ± price jitter fraction.
    pub jitter: f64,
    /// Authoritative count poll interval.
    pub threshold_poll_interval: Duration,
    /// Receiver ticks are forwarded to.
    pub receiver_url: String,
    /// Per-tick send timeout.
    pub send_timeout: Duration,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            threshold: 30,
            tick_interval: Duration::from_millis(1_000),
            jitter: DEFAULT_JITTER,
            threshold_poll_interval: Duration::from_secs(10),
            receiver_url: "http://localhost:8002".to_string(),
            send_timeout: Duration::from_millis(2_000),
        }
    }
}

/// Persistence and buffering settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Ready-symbol checkpoint file. `None` keeps the set in memory.
    pub ready_symbols_path: Option<PathBuf>,
    /// Received tick retention window.
    pub tick_retention: Duration,
    /// Maximum buffered ticks.
    pub tick_buffer_capacity: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            ready_symbols_path: Some(PathBuf::from("state/ready_symbols.json")),
            tick_retention: Duration::from_secs(86_400),
            tick_buffer_capacity: 100_000,
        }
    }
}

/// Symbol source settings.
#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    /// Remote stock API. `None` uses the local catalog.
    pub symbol_source_url: Option<String>,
    /// Catalog seeds.
    pub seed_symbols: Vec<Ticker>,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Event transport settings.
    pub transport: TransportSettings,
    /// Threshold and tick loop settings.
    pub streaming: StreamingSettings,
    /// Persistence and buffering settings.
    pub storage: StorageSettings,
    /// Symbol source settings.
    pub source: SourceSettings,
}

impl PipelineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value violates its constraint.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value violates its constraint.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let server = ServerSettings {
            http_port: env.u16("PIPELINE_HTTP_PORT", ServerSettings::default().http_port),
        };

        let transport_defaults = TransportSettings::default();
        let transport = TransportSettings {
            topic: env.optional("EVENT_TOPIC", transport_defaults.topic),
            queue: env.optional("EVENT_QUEUE", transport_defaults.queue),
            bus_url: env.optional("EVENT_BUS_URL", None),
            poll_interval: env.duration_secs(
                "EVENT_POLL_INTERVAL_SECS",
                transport_defaults.poll_interval,
            ),
            poll_batch: env.usize("EVENT_POLL_BATCH", transport_defaults.poll_batch),
            listener_stop_timeout: env.duration_secs(
                "EVENT_LISTENER_STOP_TIMEOUT_SECS",
                transport_defaults.listener_stop_timeout,
            ),
            history_capacity: env.usize(
                "EVENT_HISTORY_CAPACITY",
                transport_defaults.history_capacity,
            ),
        };

        let streaming_defaults = StreamingSettings::default();
        let streaming = StreamingSettings {
            threshold: env.usize("STOCK_THRESHOLD", streaming_defaults.threshold),
            tick_interval: env.duration_millis("TICK_INTERVAL_MS", streaming_defaults.tick_interval),
            jitter: env.f64("TICK_JITTER", streaming_defaults.jitter),
            threshold_poll_interval: env.duration_secs(
                "THRESHOLD_POLL_INTERVAL_SECS",
                streaming_defaults.threshold_poll_interval,
            ),
            receiver_url: env
                .optional("STREAM_RECEIVER_URL", Some(streaming_defaults.receiver_url.clone()))
                .unwrap_or(streaming_defaults.receiver_url),
            send_timeout: env.duration_millis("TICK_SEND_TIMEOUT_MS", streaming_defaults.send_timeout),
        };

        let storage_defaults = StorageSettings::default();
        let storage = StorageSettings {
            ready_symbols_path: env
                .optional(
                    "READY_SYMBOLS_PATH",
                    storage_defaults
                        .ready_symbols_path
                        .map(|p| p.to_string_lossy().into_owned()),
                )
                .map(PathBuf::from),
            tick_retention: env.duration_secs("TICK_RETENTION_SECS", storage_defaults.tick_retention),
            tick_buffer_capacity: env.usize(
                "TICK_BUFFER_CAPACITY",
                storage_defaults.tick_buffer_capacity,
            ),
        };

        let source = SourceSettings {
            symbol_source_url: env.optional("SYMBOL_SOURCE_URL", None),
            seed_symbols: env
                .optional("SEED_SYMBOLS", None)
                .map(|raw| parse_seed_symbols(&raw))
                .transpose()?
                .unwrap_or_default(),
        };

        let config = Self {
            server,
            transport,
            streaming,
            storage,
            source,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field and range constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streaming.threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "STOCK_THRESHOLD".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.streaming.jitter > 0.0 && self.streaming.jitter < 0.5) {
            return Err(ConfigError::Invalid {
                key: "TICK_JITTER".to_string(),
                reason: format!("{} is outside (0, 0.5)", self.streaming.jitter),
            });
        }
        if self.streaming.tick_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "TICK_INTERVAL_MS".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.streaming.threshold_poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "THRESHOLD_POLL_INTERVAL_SECS".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.transport.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "EVENT_POLL_INTERVAL_SECS".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.transport.poll_batch == 0 {
            return Err(ConfigError::Invalid {
                key: "EVENT_POLL_BATCH".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value parsed but violates a constraint.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Parse `AAPL=189.5,MSFT=410.2` (optionally `SYMBOL=price:volume`).
///
/// # Errors
///
/// Returns `ConfigError::Invalid` for entries without a positive price.
pub fn parse_seed_symbols(raw: &str) -> Result<Vec<Ticker>, ConfigError> {
    let invalid = |entry: &str| ConfigError::Invalid {
        key: "SEED_SYMBOLS".to_string(),
        reason: format!("cannot parse entry '{entry}'"),
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (symbol, rest) = entry.split_once('=').ok_or_else(|| invalid(entry))?;
            let (price, volume) = match rest.split_once(':') {
                Some((price, volume)) => (price, Some(volume)),
                None => (rest, None),
            };
            let symbol = symbol.trim().to_uppercase();
            let price: f64 = price.trim().parse().map_err(|_| invalid(entry))?;
            if symbol.is_empty() || !price.is_finite() || price <= 0.0 {
                return Err(invalid(entry));
            }
            let volume = match volume {
                Some(v) => v.trim().parse().map_err(|_| invalid(entry))?,
                None => crate::infrastructure::catalog::DEFAULT_VOLUME,
            };
            Ok(Ticker::new(symbol, price, volume))
        })
        .collect()
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset keeps `default`; set but blank disables.
    fn optional(&self, key: &str, default: Option<String>) -> Option<String> {
        match (self.0)(key) {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
            None => default,
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        (self.0)(key).and_then(|v| v.trim().parse().ok())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parse(key).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.parse(key).unwrap_or(default)
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.parse(key).unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_millis)
    }
}
