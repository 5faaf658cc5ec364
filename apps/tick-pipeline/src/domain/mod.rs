//! Domain Layer - Core pipeline types and business logic.
//!
//! Pure types with no I/O: pipeline events and their wire codec, simulated
//! ticks, and the ready-symbol threshold state machine.

/// Pipeline events, sources and the JSON envelope codec.
pub mod events;

/// Readiness threshold state machine.
pub mod threshold;

/// Tickers, ticks and the jittered tick generator.
pub mod tick;
