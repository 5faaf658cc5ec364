//! Notification Bus Adapters
//!
//! - [`InMemoryBus`]: single-process runs and tests
//! - [`HttpBus`]: notification gateway over HTTP
//! - [`BusEventPublisher`]: publish side of the event transport
//! - [`EventListener`]: subscribe side of the event transport

mod http;
mod listener;
mod memory;
mod publisher;

pub use http::HttpBus;
pub use listener::{
    EventListener, ListenerConfig, ListenerStatus, PollSummary, RawHandler, DEFAULT_BATCH_SIZE,
    DEFAULT_POLL_INTERVAL, DEFAULT_STOP_TIMEOUT,
};
pub use memory::InMemoryBus;
pub use publisher::{BusEventPublisher, PublisherStats, outbound_message};
