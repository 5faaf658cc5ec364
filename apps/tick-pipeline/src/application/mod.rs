//! Application Layer - Use cases and port definitions.
//!
//! Services that coordinate the pipeline (event dispatch, threshold-gated
//! streaming, ingestion announcements, monitoring) and the ports they use
//! to reach the notification bus, symbol storage and the tick receiver.

/// Port interfaces for external systems (bus, sink, symbol source, store).
pub mod ports;

/// Application services coordinating the pipeline.
pub mod services;
