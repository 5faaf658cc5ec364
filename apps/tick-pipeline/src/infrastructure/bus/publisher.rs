//! Bus-backed [`EventPublisher`].
//!
//! Serializes events into the wire envelope and publishes them to the
//! configured topic with a subject line and routing attributes:
//! `event_type`, `event_source`, `timestamp`. Publishing is best effort;
//! failures are logged and counted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::application::ports::{EventPublisher, NotificationBus, OutboundMessage};
use crate::application::services::FailureWindow;
use crate::domain::events::codec::format_timestamp;
use crate::domain::events::{Event, serialize};
use crate::observability::{self, Outcome};

/// Publisher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    /// Configured topic, if any.
    pub topic: Option<String>,
    /// Events accepted by the bus.
    pub published: u64,
    /// Events the bus or encoder rejected.
    pub failed: u64,
    /// Rejections inside the failure window.
    pub recent_failures: u64,
    /// Events dropped because no topic is configured.
    pub skipped: u64,
    /// Most recent failure.
    pub last_error: Option<String>,
}

/// Publishes events to a notification bus topic.
pub struct BusEventPublisher {
    bus: Arc<dyn NotificationBus>,
    topic: Option<String>,
    published: AtomicU64,
    failed: AtomicU64,
    recent_failures: FailureWindow,
    skipped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl std::fmt::Debug for BusEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusEventPublisher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl BusEventPublisher {
    /// Create a publisher. An empty or missing topic disables publishing.
    #[must_use]
    pub fn new(bus: Arc<dyn NotificationBus>, topic: Option<String>) -> Self {
        let topic = topic.filter(|t| !t.trim().is_empty());
        if topic.is_none() {
            tracing::warn!("No event topic configured, events stay local");
        }
        Self {
            bus,
            topic,
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            recent_failures: FailureWindow::default(),
            skipped: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Whether a topic is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.topic.is_some()
    }

    /// Configured topic.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Check that the topic exists on the bus.
    pub async fn test_connection(&self) -> bool {
        let Some(topic) = &self.topic else {
            return false;
        };
        match self.bus.topic_exists(topic).await {
            Ok(true) => {
                tracing::info!(topic = %topic, "Event topic reachable");
                true
            }
            Ok(false) => {
                tracing::warn!(topic = %topic, "Event topic does not exist");
                false
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Event topic check failed");
                false
            }
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            topic: self.topic.clone(),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            recent_failures: self.recent_failures.count(),
            skipped: self.skipped.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }

    fn fail(&self, event: &Event, error: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.recent_failures.record();
        observability::record_event_published(Outcome::Failure);
        tracing::warn!(
            kind = %event.kind(),
            event_id = event.id(),
            error = %error,
            "Failed to publish event"
        );
        *self.last_error.lock() = Some(error);
    }
}

/// Subject, body and attributes for `event`.
///
/// # Errors
///
/// Returns the encoder's message if the event cannot be serialized.
pub fn outbound_message(event: &Event) -> Result<OutboundMessage, String> {
    let body = serialize(event).map_err(|e| e.to_string())?;
    let body = String::from_utf8(body).map_err(|e| e.to_string())?;
    let attributes = BTreeMap::from([
        ("event_type".to_string(), event.kind().as_str().to_string()),
        ("event_source".to_string(), event.source().as_str().to_string()),
        ("timestamp".to_string(), format_timestamp(&event.timestamp())),
    ]);
    Ok(OutboundMessage {
        subject: format!("Pipeline event: {}", event.kind()),
        body,
        attributes,
    })
}

#[async_trait]
impl EventPublisher for BusEventPublisher {
    async fn publish(&self, event: &Event) -> bool {
        let Some(topic) = &self.topic else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            observability::record_event_published(Outcome::Skipped);
            tracing::debug!(kind = %event.kind(), "No event topic, publish skipped");
            return false;
        };

        let message = match outbound_message(event) {
            Ok(message) => message,
            Err(e) => {
                self.fail(event, e);
                return false;
            }
        };

        match self.bus.publish(topic, message).await {
            Ok(message_id) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                observability::record_event_published(Outcome::Success);
                tracing::debug!(
                    kind = %event.kind(),
                    event_id = event.id(),
                    message_id = %message_id,
                    "Event published"
                );
                true
            }
            Err(e) => {
                self.fail(event, e.to_string());
                false
            }
        }
    }
}
