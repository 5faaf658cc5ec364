//! Pipeline Metrics
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Events**: Dispatches, handler failures, bus publish/receive outcomes
//! - **Ticks**: Generated, forwarded, failed and received ticks
//! - **Controller**: Ready symbol count and streaming flag
//! - **Latency**: Tick forwarding round trips
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the HTTP server.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::domain::events::EventKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Tick forwards are local HTTP posts; buckets span sub-millisecond to the
/// send timeout.
const TICK_SEND_BUCKETS: [f64; 9] = [0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.1, 0.5, 2.0];

/// Install the Prometheus recorder once and return its handle.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let builder = match builder.set_buckets_for_metric(
                Matcher::Full("tick_pipeline_tick_send_seconds".to_string()),
                &TICK_SEND_BUCKETS,
            ) {
                Ok(tuned) => tuned,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid tick latency buckets, using summaries");
                    PrometheusBuilder::new()
                }
            };
            let handle = builder
                .install_recorder()
                .expect("a second global metrics recorder cannot be installed");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "tick_pipeline_events_dispatched_total",
        "Events delivered to the local dispatcher by kind"
    );
    describe_counter!(
        "tick_pipeline_handler_errors_total",
        "Event handlers that failed or panicked by kind"
    );
    describe_counter!(
        "tick_pipeline_events_published_total",
        "Events published to the notification bus by outcome"
    );
    describe_counter!(
        "tick_pipeline_events_received_total",
        "Notification bus messages received by outcome"
    );

    describe_counter!(
        "tick_pipeline_ticks_generated_total",
        "Ticks produced by the streaming loop"
    );
    describe_counter!(
        "tick_pipeline_tick_send_failures_total",
        "Ticks the receiver did not accept"
    );
    describe_counter!(
        "tick_pipeline_ticks_received_total",
        "Ticks accepted by the receiver endpoint"
    );

    describe_gauge!(
        "tick_pipeline_ready_symbols",
        "Symbols in the controller's ready set"
    );
    describe_gauge!(
        "tick_pipeline_streaming",
        "1 while the tick loop is streaming"
    );

    describe_histogram!(
        "tick_pipeline_tick_send_seconds",
        "Round trip time of tick forwarding"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for bus traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Delivered or processed.
    Success,
    /// Transport or encoding failure.
    Failure,
    /// Skipped (unconfigured, own echo, undecodable).
    Skipped,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }
}

/// Record an event delivered to the local dispatcher.
pub fn record_event_dispatched(kind: EventKind) {
    counter!(
        "tick_pipeline_events_dispatched_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a failed event handler.
pub fn record_handler_error(kind: EventKind) {
    counter!(
        "tick_pipeline_handler_errors_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a bus publish attempt.
pub fn record_event_published(outcome: Outcome) {
    counter!(
        "tick_pipeline_events_published_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a message received from the bus.
pub fn record_event_received(outcome: Outcome) {
    counter!(
        "tick_pipeline_events_received_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a generated tick.
pub fn record_tick_generated() {
    counter!("tick_pipeline_ticks_generated_total").increment(1);
}

/// Record a tick the receiver did not accept.
pub fn record_tick_send_failure() {
    counter!("tick_pipeline_tick_send_failures_total").increment(1);
}

/// Record a tick accepted by the receiver endpoint.
pub fn record_tick_received() {
    counter!("tick_pipeline_ticks_received_total").increment(1);
}

/// Record tick forwarding round trip.
pub fn record_tick_send_duration(duration: Duration) {
    histogram!("tick_pipeline_tick_send_seconds").record(duration.as_secs_f64());
}

/// Update the ready symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_ready_symbols(count: usize) {
    gauge!("tick_pipeline_ready_symbols").set(count as f64);
}

/// Update the streaming flag gauge.
pub fn set_streaming(streaming: bool) {
    gauge!("tick_pipeline_streaming").set(if streaming { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================
