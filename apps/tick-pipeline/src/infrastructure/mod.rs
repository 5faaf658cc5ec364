//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces defined in the
//! application layer, plus the HTTP surface.

/// Broadcast hub relaying received ticks to WebSocket clients.
pub mod broadcast;

/// Bounded store of received ticks.
pub mod buffer;

/// Notification bus adapters and the event transport.
pub mod bus;

/// Stock catalog and remote symbol source.
pub mod catalog;

/// Configuration loading.
pub mod config;

/// Health check, probe and metrics routes.
pub mod health;

/// REST and WebSocket API.
pub mod http;

/// HTTP tick sink.
pub mod sink;

/// Ready-symbol checkpoint stores.
pub mod store;
