//! Pipeline Events
//!
//! Typed events exchanged between the ingestion, streaming and receiver
//! roles of the pipeline. Each event carries a kind (derived from its
//! payload), the emitting source, a unique id, a UTC timestamp truncated
//! to microseconds, and a kind-specific payload.
//!
//! Events are immutable once created. The wire envelope is produced by the
//! [`codec`] module.

pub mod codec;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

pub use codec::{
    DecodeError, EncodeError, decode_value, deserialize, format_timestamp, parse_timestamp, serialize,
};

// =============================================================================
// Event Kind
// =============================================================================

/// Discriminant of a pipeline event.
///
/// Travels on the wire by its symbolic name, never by ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A symbol's historical data finished loading.
    StockDataLoaded,
    /// A symbol's company profile was refreshed.
    CompanyInfoUpdated,
    /// A batch ingestion run finished.
    BatchDataCompleted,
    /// A peer observed the ready-symbol threshold.
    DataThresholdReached,
    /// A peer has enough data to stream but has not started.
    StreamingReady,
    /// The tick loop started.
    StreamingStarted,
    /// The tick loop stopped.
    StreamingStopped,
    /// A tick was generated or received.
    TickGenerated,
    /// Periodic service status report.
    SystemStatusUpdate,
    /// Liveness report from a peer service.
    HealthCheck,
    /// A service reported an error.
    ErrorOccurred,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::StockDataLoaded,
        Self::CompanyInfoUpdated,
        Self::BatchDataCompleted,
        Self::DataThresholdReached,
        Self::StreamingReady,
        Self::StreamingStarted,
        Self::StreamingStopped,
        Self::TickGenerated,
        Self::SystemStatusUpdate,
        Self::HealthCheck,
        Self::ErrorOccurred,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StockDataLoaded => "stock_data_loaded",
            Self::CompanyInfoUpdated => "company_info_updated",
            Self::BatchDataCompleted => "batch_data_completed",
            Self::DataThresholdReached => "data_threshold_reached",
            Self::StreamingReady => "streaming_ready",
            Self::StreamingStarted => "streaming_started",
            Self::StreamingStopped => "streaming_stopped",
            Self::TickGenerated => "tick_generated",
            Self::SystemStatusUpdate => "system_status_update",
            Self::HealthCheck => "health_check",
            Self::ErrorOccurred => "error_occurred",
        }
    }

    /// Parse a wire name. Returns `None` for unknown names.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    const fn id_prefix(self) -> &'static str {
        match self {
            Self::StockDataLoaded => "stock_loaded",
            Self::CompanyInfoUpdated => "company_info",
            Self::BatchDataCompleted => "batch_completed",
            Self::DataThresholdReached => "threshold",
            Self::StreamingReady => "ready",
            Self::StreamingStarted => "streaming",
            Self::StreamingStopped => "stopped",
            Self::TickGenerated => "tick",
            Self::SystemStatusUpdate => "status",
            Self::HealthCheck => "health",
            Self::ErrorOccurred => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Event Source
// =============================================================================

/// Service role that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Ingestion API.
    ApiServer,
    /// Threshold controller and tick generator.
    Driver,
    /// Tick receiver.
    StreamReceiver,
    /// Cross-cutting system reports.
    System,
}

impl EventSource {
    /// Every source, in declaration order.
    pub const ALL: [Self; 4] = [Self::ApiServer, Self::Driver, Self::StreamReceiver, Self::System];

    /// Wire name of the source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiServer => "api_server",
            Self::Driver => "driver",
            Self::StreamReceiver => "stream_receiver",
            Self::System => "system",
        }
    }

    /// Parse a wire name. Returns `None` for unknown names.
    ///
    /// Also accepts the `ec2_`-prefixed names older peers still send.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = match name {
            "ec2_api_server" => "api_server",
            "ec2_driver" => "driver",
            "ec2_stream_receiver" => "stream_receiver",
            other => other,
        };
        Self::ALL.into_iter().find(|source| source.as_str() == name)
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Severity attached to error reports.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Default severity.
    #[default]
    Medium,
    /// Degrades the pipeline.
    High,
    /// Pipeline cannot make progress.
    Critical,
}

impl Severity {
    /// Every severity, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Wire name of the severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Default `stream_type` for ticks that do not name one.
pub const DEFAULT_STREAM_TYPE: &str = "simulated";

fn default_stream_type() -> String {
    DEFAULT_STREAM_TYPE.to_string()
}

/// Historical data for one symbol finished loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDataLoaded {
    /// Ticker symbol.
    pub symbol: String,
    /// Number of records stored.
    pub records_count: u64,
    /// Date of the most recent record.
    pub latest_date: String,
    /// Most recent close price.
    pub latest_price: f64,
}

/// A symbol's company profile was refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfoUpdated {
    /// Ticker symbol.
    pub symbol: String,
    /// Company name, when the profile carries one.
    #[serde(default)]
    pub company_name: Option<String>,
}

/// A batch ingestion run finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCompleted {
    /// Symbols attempted.
    pub symbols_processed: u64,
    /// Symbols loaded without error.
    pub successful_symbols: u64,
    /// Records stored across the batch.
    pub total_records: u64,
    /// Symbols that loaded successfully.
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// The ready-symbol threshold was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdReached {
    /// Ready symbols at the time of the crossing.
    pub stock_count: u64,
    /// Configured threshold.
    pub threshold: u64,
    /// Ready symbols.
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// A peer has enough data to stream but has not started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingReady {
    /// Ready symbols.
    pub stock_count: u64,
    /// Ready symbol names.
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// The tick loop started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingStarted {
    /// Symbols being streamed.
    pub stocks_count: u64,
    /// Sleep between sweeps, in seconds.
    pub tick_interval: f64,
    /// Streamed symbols.
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// The tick loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingStopped {
    /// Why the loop stopped, e.g. `requested`, `restart` or `shutdown`.
    pub reason: String,
    /// Ticks the stopped loop produced.
    pub ticks_generated: u64,
    /// Symbols the stopped loop was streaming.
    #[serde(default)]
    pub stocks_count: u64,
}

/// A tick was generated or received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickGenerated {
    /// Ticker symbol.
    pub symbol: String,
    /// Tick price.
    pub price: f64,
    /// Difference from the base price.
    pub price_change: f64,
    /// Sequence number within the streaming session.
    pub tick_number: u64,
    /// Stream label.
    #[serde(default = "default_stream_type")]
    pub stream_type: String,
}

/// Periodic service status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Reporting service.
    pub service_name: String,
    /// Free-form status label.
    pub status: String,
    /// Human readable message.
    pub message: String,
    /// Arbitrary service metrics.
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

/// Liveness report from a peer service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Reporting service.
    pub service_name: String,
    /// Health label, e.g. `healthy`.
    pub status: String,
    /// Service-specific detail.
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

/// A service reported an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error category.
    pub error_type: String,
    /// Error detail.
    pub error_message: String,
    /// Reporting service.
    pub service_name: String,
    /// Severity, `medium` when omitted.
    #[serde(default)]
    pub severity: Severity,
}

/// Kind-specific event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// See [`StockDataLoaded`].
    StockDataLoaded(StockDataLoaded),
    /// See [`CompanyInfoUpdated`].
    CompanyInfoUpdated(CompanyInfoUpdated),
    /// See [`BatchCompleted`].
    BatchCompleted(BatchCompleted),
    /// See [`ThresholdReached`].
    ThresholdReached(ThresholdReached),
    /// See [`StreamingReady`].
    StreamingReady(StreamingReady),
    /// See [`StreamingStarted`].
    StreamingStarted(StreamingStarted),
    /// See [`StreamingStopped`].
    StreamingStopped(StreamingStopped),
    /// See [`TickGenerated`].
    TickGenerated(TickGenerated),
    /// See [`SystemStatus`].
    SystemStatus(SystemStatus),
    /// See [`HealthCheck`].
    HealthCheck(HealthCheck),
    /// See [`ErrorReport`].
    Error(ErrorReport),
}

impl EventPayload {
    /// Kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StockDataLoaded(_) => EventKind::StockDataLoaded,
            Self::CompanyInfoUpdated(_) => EventKind::CompanyInfoUpdated,
            Self::BatchCompleted(_) => EventKind::BatchDataCompleted,
            Self::ThresholdReached(_) => EventKind::DataThresholdReached,
            Self::StreamingReady(_) => EventKind::StreamingReady,
            Self::StreamingStarted(_) => EventKind::StreamingStarted,
            Self::StreamingStopped(_) => EventKind::StreamingStopped,
            Self::TickGenerated(_) => EventKind::TickGenerated,
            Self::SystemStatus(_) => EventKind::SystemStatusUpdate,
            Self::HealthCheck(_) => EventKind::HealthCheck,
            Self::Error(_) => EventKind::ErrorOccurred,
        }
    }

    /// Source that normally emits this payload.
    #[must_use]
    pub const fn default_source(&self) -> EventSource {
        match self {
            Self::StockDataLoaded(_) | Self::CompanyInfoUpdated(_) | Self::BatchCompleted(_) => {
                EventSource::ApiServer
            }
            Self::ThresholdReached(_)
            | Self::StreamingReady(_)
            | Self::StreamingStarted(_)
            | Self::StreamingStopped(_)
            | Self::TickGenerated(_) => EventSource::Driver,
            Self::SystemStatus(_) | Self::HealthCheck(_) | Self::Error(_) => EventSource::System,
        }
    }

    fn entity(&self) -> &str {
        match self {
            Self::StockDataLoaded(p) => &p.symbol,
            Self::CompanyInfoUpdated(p) => &p.symbol,
            Self::TickGenerated(p) => &p.symbol,
            Self::BatchCompleted(_) => "batch",
            Self::ThresholdReached(_) | Self::StreamingReady(_) => "ready",
            Self::StreamingStarted(_) | Self::StreamingStopped(_) => "session",
            Self::SystemStatus(p) => &p.service_name,
            Self::HealthCheck(p) => &p.service_name,
            Self::Error(p) => &p.service_name,
        }
    }
}

impl Serialize for EventPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::StockDataLoaded(p) => p.serialize(serializer),
            Self::CompanyInfoUpdated(p) => p.serialize(serializer),
            Self::BatchCompleted(p) => p.serialize(serializer),
            Self::ThresholdReached(p) => p.serialize(serializer),
            Self::StreamingReady(p) => p.serialize(serializer),
            Self::StreamingStarted(p) => p.serialize(serializer),
            Self::StreamingStopped(p) => p.serialize(serializer),
            Self::TickGenerated(p) => p.serialize(serializer),
            Self::SystemStatus(p) => p.serialize(serializer),
            Self::HealthCheck(p) => p.serialize(serializer),
            Self::Error(p) => p.serialize(serializer),
        }
    }
}

// =============================================================================
// Event
// =============================================================================

/// An immutable pipeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: String,
    source: EventSource,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
}

impl Event {
    /// Create an event stamped with the current time and a fresh id.
    #[must_use]
    pub fn new(source: EventSource, payload: EventPayload) -> Self {
        let timestamp = Utc::now().trunc_subsecs(6);
        let id = generate_id(&payload, timestamp);
        Self {
            id,
            source,
            timestamp,
            payload,
        }
    }

    /// Create an event from its payload's default source.
    #[must_use]
    pub fn from_payload(payload: EventPayload) -> Self {
        Self::new(payload.default_source(), payload)
    }

    /// Historical data for `symbol` finished loading.
    #[must_use]
    pub fn stock_data_loaded(
        symbol: impl Into<String>,
        records_count: u64,
        latest_date: impl Into<String>,
        latest_price: f64,
    ) -> Self {
        Self::from_payload(EventPayload::StockDataLoaded(StockDataLoaded {
            symbol: symbol.into(),
            records_count,
            latest_date: latest_date.into(),
            latest_price,
        }))
    }

    /// Company profile for `symbol` was refreshed.
    #[must_use]
    pub fn company_info_updated(symbol: impl Into<String>, company_name: Option<String>) -> Self {
        Self::from_payload(EventPayload::CompanyInfoUpdated(CompanyInfoUpdated {
            symbol: symbol.into(),
            company_name,
        }))
    }

    /// A batch ingestion run finished.
    #[must_use]
    pub fn batch_completed(
        symbols_processed: u64,
        successful_symbols: u64,
        total_records: u64,
        symbols: Vec<String>,
    ) -> Self {
        Self::from_payload(EventPayload::BatchCompleted(BatchCompleted {
            symbols_processed,
            successful_symbols,
            total_records,
            symbols,
        }))
    }

    /// The ready-symbol threshold was observed.
    #[must_use]
    pub fn threshold_reached(stock_count: u64, threshold: u64, symbols: Vec<String>) -> Self {
        Self::from_payload(EventPayload::ThresholdReached(ThresholdReached {
            stock_count,
            threshold,
            symbols,
        }))
    }

    /// The tick loop started.
    #[must_use]
    pub fn streaming_started(stocks_count: u64, tick_interval: f64, symbols: Vec<String>) -> Self {
        Self::from_payload(EventPayload::StreamingStarted(StreamingStarted {
            stocks_count,
            tick_interval,
            symbols,
        }))
    }

    /// The tick loop stopped after producing `ticks_generated` ticks.
    #[must_use]
    pub fn streaming_stopped(
        reason: impl Into<String>,
        ticks_generated: u64,
        stocks_count: u64,
    ) -> Self {
        Self::from_payload(EventPayload::StreamingStopped(StreamingStopped {
            reason: reason.into(),
            ticks_generated,
            stocks_count,
        }))
    }

    /// Enough symbols are ready but streaming has not started.
    #[must_use]
    pub fn streaming_ready(symbols: Vec<String>) -> Self {
        Self::from_payload(EventPayload::StreamingReady(StreamingReady {
            stock_count: symbols.len() as u64,
            symbols,
        }))
    }

    /// A tick was generated.
    #[must_use]
    pub fn tick_generated(
        symbol: impl Into<String>,
        price: f64,
        price_change: f64,
        tick_number: u64,
    ) -> Self {
        Self::from_payload(EventPayload::TickGenerated(TickGenerated {
            symbol: symbol.into(),
            price,
            price_change,
            tick_number,
            stream_type: default_stream_type(),
        }))
    }

    /// Periodic status report.
    #[must_use]
    pub fn system_status(
        service_name: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
        metrics: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self::from_payload(EventPayload::SystemStatus(SystemStatus {
            service_name: service_name.into(),
            status: status.into(),
            message: message.into(),
            metrics,
        }))
    }

    /// Liveness report.
    #[must_use]
    pub fn health_check(
        service_name: impl Into<String>,
        status: impl Into<String>,
        details: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self::from_payload(EventPayload::HealthCheck(HealthCheck {
            service_name: service_name.into(),
            status: status.into(),
            details,
        }))
    }

    /// Error report.
    #[must_use]
    pub fn error(
        error_type: impl Into<String>,
        error_message: impl Into<String>,
        service_name: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self::from_payload(EventPayload::Error(ErrorReport {
            error_type: error_type.into(),
            error_message: error_message.into(),
            service_name: service_name.into(),
            severity,
        }))
    }

    /// Replace the emitting source.
    #[must_use]
    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    /// Unique event id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Event kind, derived from the payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Emitting source.
    #[must_use]
    pub const fn source(&self) -> EventSource {
        self.source
    }

    /// Creation time, microsecond precision.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Kind-specific payload.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

fn generate_id(payload: &EventPayload, timestamp: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}",
        payload.kind().id_prefix(),
        payload.entity(),
        timestamp.timestamp_micros(),
        &suffix[..8]
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Timelike;

    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("market_closed"), None);
    }

    #[test]
    fn source_names_round_trip() {
        for source in EventSource::ALL {
            assert_eq!(EventSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(EventSource::parse("dashboard"), None);
    }

    #[test]
    fn legacy_source_names_are_accepted() {
        assert_eq!(EventSource::parse("ec2_api_server"), Some(EventSource::ApiServer));
        assert_eq!(EventSource::parse("ec2_driver"), Some(EventSource::Driver));
        assert_eq!(
            EventSource::parse("ec2_stream_receiver"),
            Some(EventSource::StreamReceiver)
        );
        assert_eq!(EventSource::parse("ec2_system"), None);
    }

    #[test]
    fn stopped_events_carry_session_totals() {
        let event = Event::streaming_stopped("requested", 120, 3);
        assert_eq!(event.kind(), EventKind::StreamingStopped);
        assert_eq!(event.source(), EventSource::Driver);
        assert!(event.id().starts_with("stopped_session_"));
        match event.payload() {
            EventPayload::StreamingStopped(p) => {
                assert_eq!(p.reason, "requested");
                assert_eq!(p.ticks_generated, 120);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn kind_serializes_by_name() {
        assert_eq!(
            serde_json::to_string(&EventKind::DataThresholdReached).unwrap(),
            "\"data_threshold_reached\""
        );
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn kind_follows_payload() {
        let event = Event::threshold_reached(30, 30, vec!["AAPL".to_string()]);
        assert_eq!(event.kind(), EventKind::DataThresholdReached);
        assert_eq!(event.source(), EventSource::Driver);

        let event = Event::stock_data_loaded("AAPL", 100, "2024-01-02", 189.5);
        assert_eq!(event.kind(), EventKind::StockDataLoaded);
        assert_eq!(event.source(), EventSource::ApiServer);

        let event = Event::error("timeout", "bus unreachable", "driver", Severity::High);
        assert_eq!(event.kind(), EventKind::ErrorOccurred);
        assert_eq!(event.source(), EventSource::System);
    }

    #[test]
    fn with_source_overrides_default() {
        let event = Event::tick_generated("MSFT", 410.0, 0.2, 1)
            .with_source(EventSource::StreamReceiver);
        assert_eq!(event.source(), EventSource::StreamReceiver);
        assert_eq!(event.kind(), EventKind::TickGenerated);
    }

    #[test]
    fn timestamp_truncated_to_micros() {
        let event = Event::tick_generated("AAPL", 100.0, 0.0, 1);
        assert_eq!(event.timestamp().nanosecond() % 1_000, 0);
    }

    #[test]
    fn ids_embed_kind_and_entity() {
        let event = Event::stock_data_loaded("NVDA", 10, "2024-01-02", 500.0);
        assert!(event.id().starts_with("stock_loaded_NVDA_"));
    }

    #[test]
    fn ids_are_unique_within_same_microsecond() {
        let ids: HashSet<String> = (0..1_000)
            .map(|_| Event::tick_generated("AAPL", 100.0, 0.0, 1).id().to_string())
            .collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn severity_defaults_to_medium() {
        assert_eq!(Severity::default(), Severity::Medium);
    }
}
