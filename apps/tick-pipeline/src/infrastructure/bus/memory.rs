//! In-process notification bus.
//!
//! Topics fan out to every bound queue. Received messages move to an
//! in-flight set until acknowledged.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{BusError, InboundMessage, NotificationBus, OutboundMessage};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    message: OutboundMessage,
}

#[derive(Debug, Default)]
struct Queue {
    pending: VecDeque<StoredMessage>,
    in_flight: HashMap<String, StoredMessage>,
}

#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, Vec<String>>,
    queues: HashMap<String, Queue>,
}

/// [`NotificationBus`] held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    state: Mutex<BusState>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` if missing.
    pub fn create_topic(&self, topic: &str) {
        self.state.lock().topics.entry(topic.to_string()).or_default();
    }

    /// Create `topic` and `queue` if missing and subscribe the queue.
    pub fn bind(&self, topic: &str, queue: &str) {
        let mut state = self.state.lock();
        state.queues.entry(queue.to_string()).or_default();
        let bound = state.topics.entry(topic.to_string()).or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
    }

    /// Messages waiting in `queue`.
    #[must_use]
    pub fn pending(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.pending.len())
    }

    /// Messages received from `queue` but not yet acknowledged.
    #[must_use]
    pub fn in_flight(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.in_flight.len())
    }
}

#[async_trait]
impl NotificationBus for InMemoryBus {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<String, BusError> {
        let mut state = self.state.lock();
        let bound = state
            .topics
            .get(topic)
            .cloned()
            .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?;

        let message_id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        for queue in bound {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.pending.push_back(StoredMessage {
                    message_id: message_id.clone(),
                    message: message.clone(),
                });
            }
        }
        Ok(message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<Vec<InboundMessage>, BusError> {
        let mut state = self.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;

        let take = max_messages.min(q.pending.len());
        let mut received = Vec::with_capacity(take);
        for stored in q.pending.drain(..take).collect::<Vec<_>>() {
            let receipt = uuid::Uuid::new_v4().to_string();
            received.push(InboundMessage {
                message_id: stored.message_id.clone(),
                receipt: receipt.clone(),
                body: stored.message.body.clone(),
                attributes: stored.message.attributes.clone(),
            });
            q.in_flight.insert(receipt, stored);
        }
        Ok(received)
    }

    async fn acknowledge(&self, queue: &str, receipt: &str) -> Result<(), BusError> {
        let mut state = self.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;
        q.in_flight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| BusError::Rejected {
                status: 404,
                message: format!("unknown receipt {receipt}"),
            })
    }

    async fn topic_exists(&self, topic: &str) -> Result<bool, BusError> {
        Ok(self.state.lock().topics.contains_key(topic))
    }
}
