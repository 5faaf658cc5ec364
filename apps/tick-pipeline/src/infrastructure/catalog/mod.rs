//! Stock Catalog
//!
//! Symbol → latest snapshot store backing the [`SymbolSource`] and
//! [`StockRegistry`] ports.
//!
//! - [`StockCatalog`]: in-memory, fed by ingestion reports and by
//!   `stock_data_loaded` events relayed from peers
//! - [`HttpSymbolSource`]: remote stock API

mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

pub use http::HttpSymbolSource;

use crate::application::ports::{SourceError, StockRegistry, SymbolSource};
use crate::domain::tick::Ticker;

/// Volume reported for symbols whose loader did not supply one.
pub const DEFAULT_VOLUME: u64 = 1_000_000;

/// Latest known data for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockSnapshot {
    /// Ticker symbol.
    pub symbol: String,
    /// Most recent close.
    pub latest_price: f64,
    /// Date of the most recent record.
    pub latest_date: String,
    /// Records stored for the symbol.
    pub records_count: u64,
    /// Volume used as the tick baseline.
    pub volume: u64,
    /// When the snapshot was last written.
    pub updated_at: DateTime<Utc>,
}

impl StockSnapshot {
    /// Streaming baseline for this symbol.
    #[must_use]
    pub fn ticker(&self) -> Ticker {
        Ticker::new(self.symbol.clone(), self.latest_price, self.volume)
    }
}

/// In-memory stock catalog.
#[derive(Debug, Default)]
pub struct StockCatalog {
    stocks: RwLock<BTreeMap<String, StockSnapshot>>,
}

impl StockCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog pre-populated with `seeds`.
    #[must_use]
    pub fn seeded(seeds: &[Ticker]) -> Self {
        let catalog = Self::new();
        for seed in seeds {
            catalog.record(&seed.symbol, seed.base_price, "", 0, Some(seed.volume));
        }
        catalog
    }

    /// Insert or update a symbol.
    ///
    /// A missing `volume` keeps the previously known volume.
    pub fn record(
        &self,
        symbol: &str,
        latest_price: f64,
        latest_date: &str,
        records_count: u64,
        volume: Option<u64>,
    ) {
        let mut stocks = self.stocks.write();
        let previous_volume = stocks.get(symbol).map(|s| s.volume);
        stocks.insert(
            symbol.to_string(),
            StockSnapshot {
                symbol: symbol.to_string(),
                latest_price,
                latest_date: latest_date.to_string(),
                records_count,
                volume: volume.or(previous_volume).unwrap_or(DEFAULT_VOLUME),
                updated_at: Utc::now(),
            },
        );
    }

    /// Snapshot for `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<StockSnapshot> {
        self.stocks.read().get(symbol).cloned()
    }

    /// All snapshots, sorted by symbol.
    #[must_use]
    pub fn snapshots(&self) -> Vec<StockSnapshot> {
        self.stocks.read().values().cloned().collect()
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stocks.read().len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stocks.read().is_empty()
    }
}

impl StockRegistry for StockCatalog {
    fn record(
        &self,
        symbol: &str,
        latest_price: f64,
        latest_date: &str,
        records_count: u64,
        volume: Option<u64>,
    ) {
        Self::record(self, symbol, latest_price, latest_date, records_count, volume);
    }

    fn len(&self) -> usize {
        Self::len(self)
    }
}

#[async_trait]
impl SymbolSource for StockCatalog {
    async fn symbol_count(&self) -> Result<usize, SourceError> {
        Ok(self.len())
    }

    async fn list_symbols(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.stocks.read().keys().cloned().collect())
    }

    async fn tickers(&self) -> Result<Vec<Ticker>, SourceError> {
        Ok(self
            .stocks
            .read()
            .values()
            .filter(|s| s.latest_price.is_finite() && s.latest_price > 0.0)
            .map(StockSnapshot::ticker)
            .collect())
    }
}
