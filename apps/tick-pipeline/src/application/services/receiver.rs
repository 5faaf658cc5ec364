//! Tick Receiver
//!
//! Accepts ticks posted by the streaming loop (or any other producer),
//! validates them, retains them in the [`TickStore`], relays them to live
//! subscribers and announces them as `tick_generated` events.

use std::sync::Arc;

use serde_json::Value;

use super::emitter::EventEmitter;
use crate::application::ports::{TickRelay, TickStore};
use crate::domain::events::{Event, EventSource};
use crate::domain::tick::Tick;
use crate::observability;

/// Fields an inbound tick must carry.
pub const REQUIRED_TICK_FIELDS: [&str; 4] = ["symbol", "price", "volume", "timestamp"];

/// Rejected inbound tick.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TickRejection {
    /// Body is not a JSON object.
    #[error("tick must be a JSON object")]
    NotAnObject,

    /// Required fields are absent or null.
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// Fields are present but do not form a tick.
    #[error("malformed tick: {0}")]
    Malformed(String),

    /// Symbol is blank.
    #[error("symbol must not be empty")]
    EmptySymbol,

    /// Price is not a positive finite number.
    #[error("price must be a positive number, got {0}")]
    InvalidPrice(f64),
}

/// Validates and fans out received ticks.
#[derive(Clone)]
pub struct TickIngestor {
    store: Arc<dyn TickStore>,
    relay: Arc<dyn TickRelay>,
    emitter: EventEmitter,
}

impl std::fmt::Debug for TickIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickIngestor")
            .field("emitter", &self.emitter)
            .finish_non_exhaustive()
    }
}

impl TickIngestor {
    /// Create an ingestor.
    #[must_use]
    pub fn new(
        store: Arc<dyn TickStore>,
        relay: Arc<dyn TickRelay>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            store,
            relay,
            emitter,
        }
    }

    /// Validate a raw JSON tick and accept it.
    ///
    /// # Errors
    ///
    /// Returns `TickRejection` naming what is wrong with the body.
    pub fn ingest(&self, raw: Value) -> Result<Tick, TickRejection> {
        let tick = validate(raw)?;
        self.accept(tick.clone());
        Ok(tick)
    }

    /// Store, relay and announce an already valid tick.
    pub fn accept(&self, tick: Tick) {
        self.store.push(tick.clone());
        let receivers = self.relay.relay(tick.clone());
        observability::record_tick_received();

        tracing::debug!(
            symbol = %tick.symbol,
            price = tick.price,
            receivers,
            "Tick received"
        );

        let event = Event::tick_generated(
            tick.symbol,
            tick.price,
            tick.price_change.unwrap_or(0.0),
            tick.tick_number.unwrap_or(0),
        )
        .with_source(EventSource::StreamReceiver);
        self.emitter.emit_local(event);
    }
}

fn validate(raw: Value) -> Result<Tick, TickRejection> {
    let Value::Object(fields) = &raw else {
        return Err(TickRejection::NotAnObject);
    };

    let missing: Vec<String> = REQUIRED_TICK_FIELDS
        .iter()
        .filter(|name| fields.get(**name).is_none_or(Value::is_null))
        .map(|name| (*name).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TickRejection::MissingFields(missing));
    }

    let mut tick: Tick =
        serde_json::from_value(raw).map_err(|e| TickRejection::Malformed(e.to_string()))?;

    tick.symbol = tick.symbol.trim().to_uppercase();
    if tick.symbol.is_empty() {
        return Err(TickRejection::EmptySymbol);
    }
    if !tick.price.is_finite() || tick.price <= 0.0 {
        return Err(TickRejection::InvalidPrice(tick.price));
    }
    Ok(tick)
}
