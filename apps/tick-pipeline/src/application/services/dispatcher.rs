//! Event Dispatcher
//!
//! In-process registry mapping event kinds to ordered subscriber callbacks,
//! plus a bounded history of recent events.
//!
//! Handlers run synchronously on the publishing task, in registration order,
//! outside the registry lock so they may publish or subscribe re-entrantly.
//! A handler that fails or panics is logged and counted; the remaining
//! handlers still run.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::domain::events::{Event, EventKind, EventSource};
use crate::observability;

/// Default number of events retained in history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// Trailing window used for the `recent_events` statistic, in seconds.
pub const RECENT_WINDOW_SECS: i64 = 300;

// =============================================================================
// Handler Types
// =============================================================================

/// Error returned by a subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Create a handler error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

/// Handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    handler: EventHandler,
}

/// Result of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers invoked.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Dispatcher statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Events currently held in history.
    pub total_events: usize,
    /// History counts per kind.
    pub by_kind: BTreeMap<EventKind, usize>,
    /// History counts per source.
    pub by_source: BTreeMap<EventSource, usize>,
    /// History events newer than the trailing window.
    pub recent_events: usize,
    /// Registered handlers per kind.
    pub subscribers: BTreeMap<EventKind, usize>,
    /// Events published since startup.
    pub published_total: u64,
    /// Handler failures since startup.
    pub handler_failures: u64,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Kind-keyed event dispatcher with bounded history.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    history: Mutex<VecDeque<Event>>,
    capacity: usize,
    next_id: AtomicU64,
    published_total: AtomicU64,
    handler_failures: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("capacity", &self.capacity)
            .field("history_len", &self.history.lock().len())
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Create a dispatcher retaining up to `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            handlers: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(capacity.min(4_096))),
            capacity,
            next_id: AtomicU64::new(1),
            published_total: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// History capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a handler for `kind`. Handlers run in registration order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        tracing::debug!(kind = %kind, subscription = id.0, "Handler subscribed");
        id
    }

    /// Remove a handler. Unknown ids are ignored.
    ///
    /// Returns whether a handler was removed.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(registrations) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            handlers.remove(&kind);
        }
        drop(handlers);
        if removed {
            tracing::debug!(kind = %kind, subscription = id.0, "Handler unsubscribed");
        }
        removed
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Record `event` in history and deliver it to every handler of its kind.
    ///
    /// Never fails; handler errors and panics are isolated and counted.
    pub fn publish(&self, event: Event) -> DispatchOutcome {
        let kind = event.kind();
        self.push_history(event.clone());
        self.published_total.fetch_add(1, Ordering::Relaxed);
        observability::record_event_dispatched(kind);

        let handlers: Vec<(SubscriptionId, EventHandler)> = self
            .handlers
            .read()
            .get(&kind)
            .map(|regs| {
                regs.iter()
                    .map(|r| (r.id, Arc::clone(&r.handler)))
                    .collect()
            })
            .unwrap_or_default();

        let mut outcome = DispatchOutcome::default();
        for (id, handler) in handlers {
            outcome.delivered += 1;
            let failure = match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(error) = failure {
                outcome.failed += 1;
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                observability::record_handler_error(kind);
                tracing::error!(
                    kind = %kind,
                    event_id = event.id(),
                    subscription = id.0,
                    error = %error,
                    "Event handler failed"
                );
            }
        }
        outcome
    }

    /// The most recent `limit` events, optionally filtered by kind, newest last.
    #[must_use]
    pub fn history(&self, kind: Option<EventKind>, limit: usize) -> Vec<Event> {
        let history = self.history.lock();
        let mut events: Vec<Event> = history
            .iter()
            .rev()
            .filter(|e| kind.is_none_or(|k| e.kind() == k))
            .take(limit)
            .cloned()
            .collect();
        drop(history);
        events.reverse();
        events
    }

    /// Number of events currently held in history.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Drop all history.
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Statistics as of now.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        self.stats_at(Utc::now())
    }

    /// Statistics with the trailing window measured from `now`.
    #[must_use]
    pub fn stats_at(&self, now: DateTime<Utc>) -> DispatcherStats {
        let cutoff = now - TimeDelta::seconds(RECENT_WINDOW_SECS);
        let mut stats = DispatcherStats {
            published_total: self.published_total.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            ..DispatcherStats::default()
        };

        {
            let history = self.history.lock();
            stats.total_events = history.len();
            for event in history.iter() {
                *stats.by_kind.entry(event.kind()).or_default() += 1;
                *stats.by_source.entry(event.source()).or_default() += 1;
                if event.timestamp() > cutoff {
                    stats.recent_events += 1;
                }
            }
        }

        stats.subscribers = self
            .handlers
            .read()
            .iter()
            .map(|(kind, regs)| (*kind, regs.len()))
            .collect();
        stats
    }

    fn push_history(&self, event: Event) {
        let mut history = self.history.lock();
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(|| "handler panicked".to_string(), |m| format!("handler panicked: {m}"))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use proptest::prelude::*;

    use super::*;

    fn tick(n: u64) -> Event {
        Event::tick_generated("AAPL", 100.0, 0.0, n)
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let dispatcher = EventDispatcher::default();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["h1", "h2", "h3"] {
            let calls = Arc::clone(&calls);
            dispatcher.subscribe(EventKind::TickGenerated, move |_| {
                calls.lock().push(name);
                Ok(())
            });
        }

        let outcome = dispatcher.publish(tick(1));
        assert_eq!(outcome, DispatchOutcome { delivered: 3, failed: 0 });
        assert_eq!(*calls.lock(), vec!["h1", "h2", "h3"]);
    }

    #[test]
    fn failing_handler_does_not_block_later_handlers() {
        let dispatcher = EventDispatcher::default();
        let second_ran = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(EventKind::TickGenerated, |_| {
            Err(HandlerError::new("boom"))
        });
        let counter = Arc::clone(&second_ran);
        dispatcher.subscribe(EventKind::TickGenerated, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let outcome = dispatcher.publish(tick(1));
        assert_eq!(outcome.failed, 1);
        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stats().handler_failures, 1);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let dispatcher = EventDispatcher::default();
        let second_ran = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(EventKind::TickGenerated, |_| panic!("handler exploded"));
        let counter = Arc::clone(&second_ran);
        dispatcher.subscribe(EventKind::TickGenerated, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let outcome = dispatcher.publish(tick(1));
        assert_eq!(outcome.failed, 1);
        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let dispatcher = EventDispatcher::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        dispatcher.subscribe(EventKind::StockDataLoaded, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.publish(tick(1));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        dispatcher.publish(Event::stock_data_loaded("AAPL", 1, "2024-01-02", 1.0));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let dispatcher = EventDispatcher::default();
        let id = dispatcher.subscribe(EventKind::TickGenerated, |_| Ok(()));

        assert!(dispatcher.unsubscribe(EventKind::TickGenerated, id));
        assert!(!dispatcher.unsubscribe(EventKind::TickGenerated, id));
        assert!(!dispatcher.unsubscribe(EventKind::ErrorOccurred, id));
        assert_eq!(dispatcher.subscriber_count(EventKind::TickGenerated), 0);
    }

    #[test]
    fn handlers_may_publish_reentrantly() {
        let dispatcher = Arc::new(EventDispatcher::default());
        let inner = Arc::clone(&dispatcher);
        dispatcher.subscribe(EventKind::StockDataLoaded, move |event| {
            inner.publish(Event::tick_generated("AAPL", 1.0, 0.0, 1));
            inner.subscribe(EventKind::ErrorOccurred, |_| Ok(()));
            assert_eq!(event.kind(), EventKind::StockDataLoaded);
            Ok(())
        });

        dispatcher.publish(Event::stock_data_loaded("AAPL", 1, "2024-01-02", 1.0));
        assert_eq!(dispatcher.history_len(), 2);
        assert_eq!(dispatcher.subscriber_count(EventKind::ErrorOccurred), 1);
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let dispatcher = EventDispatcher::new(3);
        for n in 1..=5 {
            dispatcher.publish(tick(n));
        }

        let numbers: Vec<u64> = dispatcher
            .history(None, 10)
            .iter()
            .map(|e| match e.payload() {
                crate::domain::events::EventPayload::TickGenerated(t) => t.tick_number,
                _ => 0,
            })
            .collect();
        assert_eq!(numbers, vec![3, 4, 5]);
    }

    #[test]
    fn history_filters_by_kind() {
        let dispatcher = EventDispatcher::default();
        dispatcher.publish(tick(1));
        dispatcher.publish(Event::stock_data_loaded("MSFT", 1, "2024-01-02", 1.0));
        dispatcher.publish(tick(2));

        let ticks = dispatcher.history(Some(EventKind::TickGenerated), 10);
        assert_eq!(ticks.len(), 2);
        let latest = dispatcher.history(Some(EventKind::TickGenerated), 1);
        assert_eq!(latest[0].id(), ticks[1].id());
    }

    #[test]
    fn stats_count_by_kind_source_and_window() {
        let dispatcher = EventDispatcher::default();
        dispatcher.subscribe(EventKind::TickGenerated, |_| Ok(()));
        dispatcher.publish(tick(1));
        dispatcher.publish(tick(2));
        dispatcher.publish(Event::stock_data_loaded("MSFT", 1, "2024-01-02", 1.0));

        let stats = dispatcher.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.by_kind[&EventKind::TickGenerated], 2);
        assert_eq!(stats.by_source[&EventSource::ApiServer], 1);
        assert_eq!(stats.recent_events, 3);
        assert_eq!(stats.subscribers[&EventKind::TickGenerated], 1);
        assert_eq!(stats.published_total, 3);

        let later = dispatcher.stats_at(Utc::now() + TimeDelta::minutes(10));
        assert_eq!(later.recent_events, 0);
        assert_eq!(later.total_events, 3);
    }

    proptest! {
        #[test]
        fn history_keeps_most_recent_in_emission_order(n in 1usize..60, cap in 1usize..25) {
            let dispatcher = EventDispatcher::new(cap);
            let ids: Vec<String> = (0..n)
                .map(|i| {
                    let event = tick(i as u64);
                    let id = event.id().to_string();
                    dispatcher.publish(event);
                    id
                })
                .collect();

            let kept: Vec<String> = dispatcher
                .history(None, n)
                .iter()
                .map(|e| e.id().to_string())
                .collect();
            let expected = ids[n.saturating_sub(cap)..].to_vec();
            prop_assert_eq!(kept, expected);
        }
    }
}
