//! Port Interfaces
//!
//! Contracts the application layer depends on, implemented by adapters in
//! the infrastructure layer.
//!
//! ## Driven Ports (Outbound)
//!
//! - `EventPublisher`: best-effort relay of events to other processes
//! - `NotificationBus`: topic publish plus queue receive/acknowledge
//! - `TickSink`: delivery of generated ticks to the receiver
//! - `SymbolSource`: authoritative symbol count, listing and tickers
//! - `StockRegistry`: catalog writes from ingestion announcements
//! - `ThresholdStore`: ready-symbol checkpoint persistence
//! - `TickStore`, `TickRelay`: retention and live fan-out of received ticks

mod event_publisher;
mod notification_bus;
mod received_ticks;
mod stock_registry;
mod symbol_source;
mod threshold_store;
mod tick_sink;

pub use event_publisher::{EventPublisher, NoOpEventPublisher};
pub use notification_bus::{BusError, InboundMessage, NotificationBus, OutboundMessage};
#[cfg(test)]
pub use received_ticks::{MockTickRelay, MockTickStore};
pub use received_ticks::{TickRelay, TickStore};
#[cfg(test)]
pub use stock_registry::MockStockRegistry;
pub use stock_registry::StockRegistry;
#[cfg(test)]
pub use symbol_source::MockSymbolSource;
pub use symbol_source::{SourceError, SymbolSource};
pub use threshold_store::{ReadyCheckpoint, StoreError, ThresholdStore};
pub use tick_sink::{NoOpTickSink, SinkError, TickSink};
