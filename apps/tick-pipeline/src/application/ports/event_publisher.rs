//! Event Publisher Port (Driven Port)
//!
//! Interface for relaying pipeline events to other processes.

use async_trait::async_trait;

use crate::domain::events::Event;

/// Port for publishing pipeline events to external systems.
///
/// Publishing is best effort: implementations log failures and report
/// them through the return value, never as an error.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event. Returns `true` if the transport accepted it.
    async fn publish(&self, event: &Event) -> bool;
}

/// No-op publisher for single-process runs and tests.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish(&self, _event: &Event) -> bool {
        false
    }
}
