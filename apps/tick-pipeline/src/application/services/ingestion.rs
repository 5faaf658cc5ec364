//! Ingestion Announcements
//!
//! Entry point for the loader side of the pipeline. A successful load of
//! one symbol, or of a whole batch, is recorded in the [`StockRegistry`]
//! and announced as a pipeline event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::dispatcher::{EventDispatcher, SubscriptionId};
use super::emitter::EventEmitter;
use crate::application::ports::StockRegistry;
use crate::domain::events::{Event, EventKind, EventPayload};

/// One symbol finished loading.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StockLoadedReport {
    /// Ticker symbol.
    pub symbol: String,
    /// Records stored for the symbol.
    pub records_count: u64,
    /// Date of the most recent record.
    pub latest_date: String,
    /// Most recent close.
    pub latest_price: f64,
    /// Baseline volume for streaming.
    #[serde(default)]
    pub volume: Option<u64>,
}

/// A symbol's company profile was refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompanyInfoReport {
    /// Ticker symbol.
    pub symbol: String,
    /// Company name.
    #[serde(default)]
    pub company_name: Option<String>,
}

/// A batch load finished.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchReport {
    /// Symbols attempted.
    pub symbols_processed: u64,
    /// Symbols loaded successfully.
    pub successful_symbols: u64,
    /// Records stored across the batch.
    pub total_records: u64,
    /// Symbols in the batch.
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Acknowledgement of an announced report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReceipt {
    /// Id of the emitted event.
    pub event_id: String,
    /// Whether the event reached the transport.
    pub published: bool,
}

/// Rejected report.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestionError {
    /// Symbol is blank.
    #[error("symbol must not be empty")]
    EmptySymbol,

    /// Price is not a positive finite number.
    #[error("latest_price must be a positive number, got {0}")]
    InvalidPrice(f64),

    /// More successes than attempts.
    #[error("successful_symbols ({successful}) exceeds symbols_processed ({processed})")]
    InconsistentBatch {
        /// Symbols attempted.
        processed: u64,
        /// Symbols reported successful.
        successful: u64,
    },
}

/// Records and announces ingestion results.
#[derive(Clone)]
pub struct IngestionReporter {
    registry: Arc<dyn StockRegistry>,
    emitter: EventEmitter,
}

impl std::fmt::Debug for IngestionReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionReporter")
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl IngestionReporter {
    /// Create a reporter.
    #[must_use]
    pub fn new(registry: Arc<dyn StockRegistry>, emitter: EventEmitter) -> Self {
        Self { registry, emitter }
    }

    /// Record a loaded symbol and emit `stock_data_loaded`.
    ///
    /// # Errors
    ///
    /// Returns `IngestionError` if the symbol is blank or the price invalid.
    pub async fn stock_loaded(
        &self,
        report: StockLoadedReport,
    ) -> Result<IngestionReceipt, IngestionError> {
        let symbol = report.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(IngestionError::EmptySymbol);
        }
        if !report.latest_price.is_finite() || report.latest_price <= 0.0 {
            return Err(IngestionError::InvalidPrice(report.latest_price));
        }

        self.registry.record(
            &symbol,
            report.latest_price,
            &report.latest_date,
            report.records_count,
            report.volume,
        );

        let event = Event::stock_data_loaded(
            symbol,
            report.records_count,
            report.latest_date,
            report.latest_price,
        );
        Ok(self.announce(event).await)
    }

    /// Emit `company_info_updated`.
    ///
    /// # Errors
    ///
    /// Returns `IngestionError::EmptySymbol` if the symbol is blank.
    pub async fn company_info_updated(
        &self,
        report: CompanyInfoReport,
    ) -> Result<IngestionReceipt, IngestionError> {
        let symbol = report.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(IngestionError::EmptySymbol);
        }
        let company_name = report
            .company_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        Ok(self
            .announce(Event::company_info_updated(symbol, company_name))
            .await)
    }

    /// Emit `batch_data_completed`.
    ///
    /// # Errors
    ///
    /// Returns `IngestionError::InconsistentBatch` if the counts disagree.
    pub async fn batch_completed(
        &self,
        report: BatchReport,
    ) -> Result<IngestionReceipt, IngestionError> {
        if report.successful_symbols > report.symbols_processed {
            return Err(IngestionError::InconsistentBatch {
                processed: report.symbols_processed,
                successful: report.successful_symbols,
            });
        }

        tracing::info!(
            processed = report.symbols_processed,
            successful = report.successful_symbols,
            catalog = self.registry.len(),
            "Batch ingestion completed"
        );

        let event = Event::batch_completed(
            report.symbols_processed,
            report.successful_symbols,
            report.total_records,
            report.symbols,
        );
        Ok(self.announce(event).await)
    }

    async fn announce(&self, event: Event) -> IngestionReceipt {
        let event_id = event.id().to_string();
        let outcome = self.emitter.emit(event).await;
        IngestionReceipt {
            event_id,
            published: outcome.published,
        }
    }
}

/// Record every `stock_data_loaded` event seen on `dispatcher` in
/// `registry`, so peers' loads count toward the local symbol source.
pub fn record_peer_loads(
    dispatcher: &EventDispatcher,
    registry: Arc<dyn StockRegistry>,
) -> SubscriptionId {
    dispatcher.subscribe(EventKind::StockDataLoaded, move |event| {
        if let EventPayload::StockDataLoaded(p) = event.payload() {
            registry.record(&p.symbol, p.latest_price, &p.latest_date, p.records_count, None);
        }
        Ok(())
    })
}
