//! Observability
//!
//! Prometheus metrics and the `tracing` subscriber. Every layer records
//! through the functions re-exported here; only the binary installs the
//! recorder and the subscriber.

pub mod metrics;
pub mod tracing;

pub use self::metrics::{
    Outcome, get_metrics_handle, init_metrics, record_event_dispatched, record_event_published,
    record_event_received, record_handler_error, record_tick_generated, record_tick_received,
    record_tick_send_duration, record_tick_send_failure, set_ready_symbols, set_streaming,
};
pub use self::tracing::{LogFormat, TelemetryConfig, TelemetryGuard, init as init_telemetry};
