//! Notification Bus Port (Driven Port)
//!
//! Publish/subscribe transport with topic fan-out into durable queues.
//! Publishers write to a topic; listeners read from a queue bound to that
//! topic and acknowledge each message once processed.

use std::collections::BTreeMap;

use async_trait::async_trait;

/// Message handed to the bus for publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Human readable subject line.
    pub subject: String,
    /// JSON body.
    pub body: String,
    /// String routing attributes for filtered subscriptions.
    pub attributes: BTreeMap<String, String>,
}

/// Message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Bus-assigned message id.
    pub message_id: String,
    /// Handle used to acknowledge the message.
    pub receipt: String,
    /// JSON body.
    pub body: String,
    /// Routing attributes copied from publication.
    pub attributes: BTreeMap<String, String>,
}

/// Notification bus error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// No topic or queue configured.
    #[error("notification bus not configured: {0}")]
    NotConfigured(String),

    /// Topic does not exist.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Queue does not exist.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// Network or connection failure.
    #[error("notification bus unreachable: {0}")]
    Unreachable(String),

    /// Bus rejected the request.
    #[error("notification bus rejected request ({status}): {message}")]
    Rejected {
        /// HTTP-style status code.
        status: u16,
        /// Response detail.
        message: String,
    },

    /// Response could not be parsed.
    #[error("invalid notification bus response: {0}")]
    InvalidResponse(String),
}

/// Port for the external notification bus.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    /// Publish a message to a topic. Returns the bus-assigned message id.
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<String, BusError>;

    /// Receive up to `max_messages` pending messages from a queue.
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<Vec<InboundMessage>, BusError>;

    /// Acknowledge (delete) a received message.
    async fn acknowledge(&self, queue: &str, receipt: &str) -> Result<(), BusError>;

    /// Check that a topic exists and is reachable.
    async fn topic_exists(&self, topic: &str) -> Result<bool, BusError>;
}
