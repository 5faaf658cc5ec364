//! Event Wire Codec
//!
//! JSON envelope shared by every transport:
//!
//! ```json
//! {
//!   "event_type": "stock_data_loaded",
//!   "event_source": "api_server",
//!   "timestamp": "2024-01-02T15:04:05.123456Z",
//!   "event_id": "stock_loaded_AAPL_1704207845123456_3f2a9c1b",
//!   "metadata": { "symbol": "AAPL", ... }
//! }
//! ```
//!
//! Decoding dispatches on `event_type` and reports unknown names with
//! [`DecodeError::UnknownEventKind`] so callers can log and skip them.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::{Event, EventKind, EventPayload, EventSource};

// =============================================================================
// Errors
// =============================================================================

/// Failure to turn wire bytes into an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// `event_type` names no known kind.
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    /// `event_source` names no known source.
    #[error("unknown event source: {0}")]
    UnknownEventSource(String),

    /// Envelope or metadata has the wrong shape.
    #[error("malformed event: {0}")]
    Malformed(String),
}

/// Failure to encode an [`Event`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to encode event: {0}")]
pub struct EncodeError(String);

// =============================================================================
// Encoding
// =============================================================================

/// Format a timestamp the way the envelope carries it.
#[must_use]
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Event", 5)?;
        state.serialize_field("event_type", self.kind().as_str())?;
        state.serialize_field("event_source", self.source.as_str())?;
        state.serialize_field("timestamp", &format_timestamp(&self.timestamp))?;
        state.serialize_field("event_id", &self.id)?;
        state.serialize_field("metadata", &self.payload)?;
        state.end()
    }
}

/// Encode an event into its JSON envelope.
///
/// # Errors
///
/// Returns `EncodeError` if the payload cannot be represented as JSON
/// (for example a non-finite price).
pub fn serialize(event: &Event) -> Result<Vec<u8>, EncodeError> {
    let value = serde_json::to_value(event).map_err(|e| EncodeError(e.to_string()))?;
    reject_non_finite(&value)?;
    serde_json::to_vec(&value).map_err(|e| EncodeError(e.to_string()))
}

// serde_json writes NaN and infinities as `null`, which would not decode.
fn reject_non_finite(value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Null => Err(EncodeError("non-finite number in metadata".to_string())),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| key.as_str() != "metrics")
            .try_for_each(|(_, v)| reject_non_finite(v)),
        Value::Array(items) => items.iter().try_for_each(reject_non_finite),
        _ => Ok(()),
    }
}

// =============================================================================
// Decoding
// =============================================================================

#[derive(Deserialize)]
struct RawEnvelope {
    event_source: String,
    timestamp: String,
    event_id: String,
    #[serde(default)]
    metadata: Value,
}

/// Decode an event from its JSON envelope.
///
/// # Errors
///
/// Returns `DecodeError::UnknownEventKind` for unrecognized `event_type`
/// values and `DecodeError::Malformed` for anything that is not a valid
/// envelope.
pub fn deserialize(bytes: &[u8]) -> Result<Event, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    decode_value(value)
}

/// Decode an event from an already parsed JSON envelope.
///
/// # Errors
///
/// Same as [`deserialize`].
pub fn decode_value(value: Value) -> Result<Event, DecodeError> {
    let kind_name = value
        .get("event_type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Malformed("missing event_type".to_string()))?;
    let kind = EventKind::parse(kind_name)
        .ok_or_else(|| DecodeError::UnknownEventKind(kind_name.to_string()))?;

    let raw: RawEnvelope =
        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let source = EventSource::parse(&raw.event_source)
        .ok_or(DecodeError::UnknownEventSource(raw.event_source))?;
    let timestamp = parse_timestamp(&raw.timestamp)?;
    let payload = decode_payload(kind, raw.metadata)?;

    Ok(Event {
        id: raw.event_id,
        source,
        timestamp,
        payload,
    })
}

fn decode_payload(kind: EventKind, metadata: Value) -> Result<EventPayload, DecodeError> {
    let payload = match kind {
        EventKind::StockDataLoaded => from_metadata(metadata).map(EventPayload::StockDataLoaded),
        EventKind::CompanyInfoUpdated => {
            from_metadata(metadata).map(EventPayload::CompanyInfoUpdated)
        }
        EventKind::BatchDataCompleted => from_metadata(metadata).map(EventPayload::BatchCompleted),
        EventKind::DataThresholdReached => {
            from_metadata(metadata).map(EventPayload::ThresholdReached)
        }
        EventKind::StreamingReady => from_metadata(metadata).map(EventPayload::StreamingReady),
        EventKind::StreamingStarted => from_metadata(metadata).map(EventPayload::StreamingStarted),
        EventKind::StreamingStopped => from_metadata(metadata).map(EventPayload::StreamingStopped),
        EventKind::TickGenerated => from_metadata(metadata).map(EventPayload::TickGenerated),
        EventKind::SystemStatusUpdate => from_metadata(metadata).map(EventPayload::SystemStatus),
        EventKind::HealthCheck => from_metadata(metadata).map(EventPayload::HealthCheck),
        EventKind::ErrorOccurred => from_metadata(metadata).map(EventPayload::Error),
    };
    payload.map_err(|e| DecodeError::Malformed(format!("{kind} metadata: {e}")))
}

fn from_metadata<T: DeserializeOwned>(metadata: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(metadata)
}

/// Parse an envelope timestamp.
///
/// Accepts RFC 3339 and offset-less ISO 8601 (interpreted as UTC).
///
/// # Errors
///
/// Returns `DecodeError::Malformed` if neither format matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| DecodeError::Malformed(format!("timestamp {raw:?}: {e}")))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::domain::events::Severity;

    fn sample_events() -> Vec<Event> {
        let mut metrics = BTreeMap::new();
        metrics.insert("ticks".to_string(), json!(120));
        metrics.insert("lag_ms".to_string(), json!(3.5));
        let mut details = BTreeMap::new();
        details.insert("uptime_secs".to_string(), json!(3_600));
        vec![
            Event::stock_data_loaded("AAPL", 250, "2024-01-02", 189.25),
            Event::company_info_updated("AAPL", Some("Apple Inc".into())),
            Event::batch_completed(3, 2, 500, vec!["AAPL".into(), "MSFT".into()]),
            Event::threshold_reached(30, 30, vec!["AAPL".into()]),
            Event::streaming_ready(vec!["AAPL".into(), "MSFT".into()]),
            Event::streaming_started(2, 1.0, vec!["AAPL".into(), "MSFT".into()]),
            Event::streaming_stopped("requested", 84, 2),
            Event::tick_generated("MSFT", 410.37, -0.12, 42),
            Event::system_status("driver", "running", "streaming 2 symbols", metrics),
            Event::health_check("stream_receiver", "healthy", details),
            Event::error("sink", "connection refused", "driver", Severity::Critical),
        ]
    }

    #[test]
    fn every_variant_round_trips() {
        let events = sample_events();
        assert_eq!(events.len(), EventKind::ALL.len());
        for event in events {
            let bytes = serialize(&event).unwrap();
            assert_eq!(deserialize(&bytes).unwrap(), event);
        }
    }

    #[test]
    fn stopped_envelope_carries_reason_and_ticks() {
        let event = Event::streaming_stopped("restart", 12, 3);
        let value: Value = serde_json::from_slice(&serialize(&event).unwrap()).unwrap();
        assert_eq!(value["event_type"], "streaming_stopped");
        assert_eq!(value["event_source"], "driver");
        assert_eq!(value["metadata"]["reason"], "restart");
        assert_eq!(value["metadata"]["ticks_generated"], 12);
    }

    #[test]
    fn legacy_envelopes_decode() {
        let raw = json!({
            "event_type": "stock_data_loaded",
            "event_source": "ec2_api_server",
            "timestamp": "2024-01-02T15:04:05.123456",
            "event_id": "stock_loaded_AAPL_1",
            "metadata": {"symbol": "AAPL", "records_count": 10, "latest_date": "2024-01-02", "latest_price": 189.5}
        });
        let event = decode_value(raw).unwrap();
        assert_eq!(event.source(), EventSource::ApiServer);

        let raw = json!({
            "event_type": "company_info_updated",
            "event_source": "ec2_api_server",
            "timestamp": "2024-01-02T15:04:05Z",
            "event_id": "company_info_AAPL_1",
            "metadata": {"symbol": "AAPL"}
        });
        match decode_value(raw).unwrap().payload() {
            EventPayload::CompanyInfoUpdated(p) => assert_eq!(p.company_name, None),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn envelope_uses_symbolic_names() {
        let event = Event::error("sink", "refused", "driver", Severity::High);
        let value: Value = serde_json::from_slice(&serialize(&event).unwrap()).unwrap();
        assert_eq!(value["event_type"], "error_occurred");
        assert_eq!(value["event_source"], "system");
        assert_eq!(value["metadata"]["severity"], "high");
        assert_eq!(value["event_id"], event.id());
    }

    #[test]
    fn unknown_kind_is_reported() {
        let raw = json!({
            "event_type": "market_closed",
            "event_source": "system",
            "timestamp": "2024-01-02T15:04:05.000001Z",
            "event_id": "x",
            "metadata": {}
        });
        assert_eq!(
            decode_value(raw),
            Err(DecodeError::UnknownEventKind("market_closed".to_string()))
        );
    }

    #[test]
    fn unknown_source_is_reported() {
        let raw = json!({
            "event_type": "tick_generated",
            "event_source": "dashboard",
            "timestamp": "2024-01-02T15:04:05Z",
            "event_id": "x",
            "metadata": {"symbol": "AAPL", "price": 1.0, "price_change": 0.0, "tick_number": 1}
        });
        assert_eq!(
            decode_value(raw),
            Err(DecodeError::UnknownEventSource("dashboard".to_string()))
        );
    }

    #[test]
    fn missing_metadata_field_is_malformed() {
        let raw = json!({
            "event_type": "stock_data_loaded",
            "event_source": "api_server",
            "timestamp": "2024-01-02T15:04:05Z",
            "event_id": "x",
            "metadata": {"symbol": "AAPL"}
        });
        assert!(matches!(decode_value(raw), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        assert!(matches!(
            deserialize(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            deserialize(b"{\"event_id\": \"x\"}"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn optional_fields_take_defaults() {
        let raw = json!({
            "event_type": "error_occurred",
            "event_source": "system",
            "timestamp": "2024-01-02T15:04:05.123456",
            "event_id": "error_driver_1",
            "metadata": {"error_type": "t", "error_message": "m", "service_name": "driver"}
        });
        let event = decode_value(raw).unwrap();
        match event.payload() {
            EventPayload::Error(report) => assert_eq!(report.severity, Severity::Medium),
            other => panic!("unexpected payload {other:?}"),
        }

        let raw = json!({
            "event_type": "tick_generated",
            "event_source": "driver",
            "timestamp": "2024-01-02T15:04:05Z",
            "event_id": "tick_AAPL_1",
            "metadata": {"symbol": "AAPL", "price": 1.0, "price_change": 0.0, "tick_number": 1}
        });
        match decode_value(raw).unwrap().payload() {
            EventPayload::TickGenerated(tick) => assert_eq!(tick.stream_type, "simulated"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let parsed = parse_timestamp("2024-01-02T15:04:05.123456").unwrap();
        assert_eq!(format_timestamp(&parsed), "2024-01-02T15:04:05.123456Z");
    }

    #[test]
    fn non_finite_price_fails_to_encode() {
        let event = Event::tick_generated("AAPL", f64::NAN, 0.0, 1);
        assert!(serialize(&event).is_err());
    }

    proptest! {
        #[test]
        fn tick_events_round_trip(
            symbol in "[A-Z]{1,5}",
            price in 0.01f64..100_000.0,
            change in -1_000.0f64..1_000.0,
            tick_number in any::<u64>(),
        ) {
            let event = Event::tick_generated(symbol, price, change, tick_number);
            let decoded = deserialize(&serialize(&event).unwrap()).unwrap();
            prop_assert_eq!(decoded, event);
        }

        #[test]
        fn threshold_events_round_trip(
            symbols in proptest::collection::vec("[A-Z]{1,5}", 0..40),
            threshold in 1u64..500,
        ) {
            let event = Event::threshold_reached(symbols.len() as u64, threshold, symbols);
            let decoded = deserialize(&serialize(&event).unwrap()).unwrap();
            prop_assert_eq!(decoded, event);
        }
    }
}
