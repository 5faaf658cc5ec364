//! Stock Registry Port (Driven Port)
//!
//! Write side of the stock catalog: the loader role records what it has
//! ingested so the symbol source and the price baselines stay current.

/// Port for recording loaded symbols.
#[cfg_attr(test, mockall::automock)]
pub trait StockRegistry: Send + Sync {
    /// Record the latest state of `symbol`, replacing any earlier entry.
    fn record(
        &self,
        symbol: &str,
        latest_price: f64,
        latest_date: &str,
        records_count: u64,
        volume: Option<u64>,
    );

    /// Number of symbols recorded.
    fn len(&self) -> usize;

    /// Whether no symbol is recorded.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
