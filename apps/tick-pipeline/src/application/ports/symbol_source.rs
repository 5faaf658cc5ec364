//! Symbol Source Port (Driven Port)
//!
//! Authoritative view of which symbols have data, used by the threshold
//! poller and by the tick loop to obtain base prices.

use async_trait::async_trait;

use crate::domain::tick::Ticker;

/// Symbol source error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Backing store could not be reached.
    #[error("symbol source unavailable: {0}")]
    Unavailable(String),

    /// Backing store returned unusable data.
    #[error("symbol source returned malformed data: {0}")]
    Malformed(String),
}

/// Port for the authoritative symbol store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SymbolSource: Send + Sync {
    /// Number of symbols with stored data.
    async fn symbol_count(&self) -> Result<usize, SourceError>;

    /// Symbols with stored data.
    async fn list_symbols(&self) -> Result<Vec<String>, SourceError>;

    /// Streaming baselines for every symbol with a known price.
    async fn tickers(&self) -> Result<Vec<Ticker>, SourceError>;
}
