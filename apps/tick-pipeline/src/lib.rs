#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Tick Pipeline - Event-Coordinated Tick Streaming
//!
//! Loader, driver and receiver roles of a stock data pipeline, coordinated
//! through typed events relayed over a notification bus. Simulated ticks
//! start flowing once enough symbols have finished loading.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `events`: Pipeline events and their JSON envelope
//!   - `threshold`: Ready-symbol threshold state machine
//!   - `tick`: Tickers, ticks and the jittered generator
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Bus, tick sink, symbol source and checkpoint interfaces
//!   - `services`: Dispatcher, emitter, streaming controller, tick loop,
//!     ingestion, receiver, health monitor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `bus`: In-memory and HTTP buses, publisher and queue listener
//!   - `catalog`: Stock catalog and remote symbol source
//!   - `http`: REST API and WebSocket relay
//!   - `health`: Health, probe and metrics routes
//!   - `config`: Environment configuration
//!
//! - **Observability**: Prometheus metrics and tracing, usable from every
//!   layer
//!
//! # Data Flow
//!
//! ```text
//! loader ──stock_data_loaded──► bus ──► listener ──► dispatcher
//!                                                      │
//!                                          streaming controller
//!                                   (threshold met or poll observed)
//!                                                      │
//!                                  tick loop ──POST /ticks──► receiver
//!                                                      │
//!                                            buffer + WebSocket relay
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core pipeline types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Metrics and tracing.
pub mod observability;

/// Service assembly shared by the binary and integration tests.
pub mod pipeline;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{
    DecodeError, EncodeError, Event, EventKind, EventPayload, EventSource, Severity,
};
pub use domain::threshold::{StartReason, StreamingPhase, ThresholdState};
pub use domain::tick::{Tick, TickGenerator, Ticker};

// Application services
pub use application::services::{
    ControllerConfig, ControllerSnapshot, EventDispatcher, EventEmitter, HealthStatus,
    IngestionReporter, PipelineMonitor, StreamingController, TickIngestor, TickStreamer,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, PipelineConfig};

// HTTP surface
pub use infrastructure::http::{AppState, HttpServerError, create_router, serve};

// Assembly
pub use pipeline::{Pipeline, PipelineAdapters, PipelineError, in_memory_bus};

// Observability
pub use observability::{TelemetryConfig, TelemetryGuard, init_metrics, init_telemetry};
