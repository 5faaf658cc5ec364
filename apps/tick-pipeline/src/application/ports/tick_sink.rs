//! Tick Sink Port (Driven Port)
//!
//! Best-effort delivery of generated ticks to the receiver.

use async_trait::async_trait;

use crate::domain::tick::Tick;

/// Tick delivery error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Connection failure or timeout.
    #[error("tick receiver unreachable: {0}")]
    Network(String),

    /// Receiver answered with a non-success status.
    #[error("tick receiver rejected tick ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// Port for forwarding ticks downstream.
#[async_trait]
pub trait TickSink: Send + Sync {
    /// Deliver one tick. Implementations must not retry.
    async fn send(&self, tick: &Tick) -> Result<(), SinkError>;
}

/// Sink that drops every tick. Used when no receiver is configured.
#[derive(Debug, Clone, Default)]
pub struct NoOpTickSink;

#[async_trait]
impl TickSink for NoOpTickSink {
    async fn send(&self, _tick: &Tick) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::tick::{TickGenerator, Ticker};

    use super::*;

    #[tokio::test]
    async fn no_op_sink_accepts_ticks() {
        let tick = TickGenerator::default().generate(&Ticker::new("AAPL", 100.0, 1), 1);
        assert!(NoOpTickSink.send(&tick).await.is_ok());
    }
}
