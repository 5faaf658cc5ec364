//! Application Services
//!
//! Orchestration over the domain model and the driven ports.

pub mod controller;
pub mod dispatcher;
pub mod emitter;
pub mod ingestion;
pub mod logging_handlers;
pub mod monitor;
pub mod receiver;
pub mod streamer;

pub use controller::{
    ControllerConfig, ControllerDeps, ControllerError, ControllerSnapshot, StreamingController,
};
pub use dispatcher::{
    DispatchOutcome, DispatcherStats, EventDispatcher, EventHandler, HandlerError, SubscriptionId,
};
pub use emitter::{EchoFilter, EmitOutcome, EventEmitter};
pub use ingestion::{
    BatchReport, CompanyInfoReport, IngestionError, IngestionReceipt, IngestionReporter,
    StockLoadedReport, record_peer_loads,
};
pub use logging_handlers::register_logging_handlers;
pub use monitor::{FAILURE_WINDOW, FailureWindow, HealthInputs, HealthStatus, PipelineMonitor};
pub use receiver::{REQUIRED_TICK_FIELDS, TickIngestor, TickRejection};
pub use streamer::{StreamHandle, StreamerStats, TickStreamer};
