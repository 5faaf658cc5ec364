//! Event Emitter
//!
//! Single entry point for events produced by this process: the event is
//! dispatched locally first, then relayed through the [`EventPublisher`].
//! Emitted ids are remembered in an [`EchoFilter`] so the bus listener can
//! skip this process's own events when they come back from the queue.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dispatcher::{DispatchOutcome, EventDispatcher};
use crate::application::ports::EventPublisher;
use crate::domain::events::Event;

/// Default number of emitted ids remembered.
pub const DEFAULT_ECHO_CAPACITY: usize = 4_096;

// =============================================================================
// Echo Filter
// =============================================================================

/// Bounded set of recently emitted event ids.
#[derive(Debug)]
pub struct EchoFilter {
    inner: Mutex<EchoState>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct EchoState {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl Default for EchoFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_CAPACITY)
    }
}

impl EchoFilter {
    /// Create a filter remembering up to `capacity` ids (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(EchoState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Remember an id, evicting the oldest beyond capacity.
    pub fn remember(&self, id: &str) {
        let mut state = self.inner.lock();
        if !state.ids.insert(id.to_string()) {
            return;
        }
        state.order.push_back(id.to_string());
        while state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.ids.remove(&evicted);
            }
        }
    }

    /// Whether `id` was emitted by this process recently.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().ids.contains(id)
    }

    /// Number of remembered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether no ids are remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Emitter
// =============================================================================

/// Result of emitting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOutcome {
    /// Local dispatch result.
    pub local: DispatchOutcome,
    /// Whether the transport accepted the event.
    pub published: bool,
}

/// Dispatches events locally and relays them to peers.
#[derive(Clone)]
pub struct EventEmitter {
    dispatcher: Arc<EventDispatcher>,
    publisher: Arc<dyn EventPublisher>,
    echoes: Arc<EchoFilter>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("dispatcher", &self.dispatcher)
            .field("echoes", &self.echoes.len())
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Create an emitter.
    #[must_use]
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        publisher: Arc<dyn EventPublisher>,
        echoes: Arc<EchoFilter>,
    ) -> Self {
        Self {
            dispatcher,
            publisher,
            echoes,
        }
    }

    /// Local dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Filter of ids emitted by this process.
    #[must_use]
    pub const fn echoes(&self) -> &Arc<EchoFilter> {
        &self.echoes
    }

    /// Dispatch locally, then publish to the transport.
    pub async fn emit(&self, event: Event) -> EmitOutcome {
        self.echoes.remember(event.id());
        let local = self.dispatcher.publish(event.clone());
        let published = self.publisher.publish(&event).await;
        if !published {
            tracing::debug!(
                kind = %event.kind(),
                event_id = event.id(),
                "Event not relayed to transport"
            );
        }
        EmitOutcome { local, published }
    }

    /// Dispatch locally without relaying.
    pub fn emit_local(&self, event: Event) -> DispatchOutcome {
        self.dispatcher.publish(event)
    }
}
