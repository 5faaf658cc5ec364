//! Event Listener
//!
//! Background task that polls a bus queue, decodes pipeline events and
//! dispatches them locally.
//!
//! # Message handling
//!
//! - Bodies wrapped in a fan-out envelope (`{"Message": "<json>"}`) are unwrapped
//! - Events this process emitted (tracked by the [`EchoFilter`]) are skipped
//! - Undecodable messages and unknown kinds are logged and dropped
//! - A decoded event is dispatched, then handed with its raw JSON envelope
//!   to the custom handler registered for its kind, if any
//! - Every received message is acknowledged, whatever the outcome

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{InboundMessage, NotificationBus};
use crate::application::services::{EchoFilter, EventDispatcher};
use crate::domain::events::{DecodeError, EventKind, decode_value};
use crate::observability::{self, Outcome};

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default messages per poll.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default bound on joining the poll task.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler invoked with the raw JSON envelope of a dispatched event.
pub type RawHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Queue to poll. `None` disables listening.
    pub queue: Option<String>,
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Messages per poll.
    pub batch_size: usize,
    /// Bound on joining the task in [`EventListener::stop`].
    pub stop_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            queue: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Messages received.
    pub received: usize,
    /// Events dispatched locally.
    pub dispatched: usize,
    /// Own events skipped.
    pub echoes: usize,
    /// Messages dropped as undecodable.
    pub undecodable: usize,
    /// Acknowledgements that failed.
    pub ack_failures: usize,
}

/// Listener state for the transport status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerStatus {
    /// Configured queue.
    pub queue: Option<String>,
    /// Whether the poll task is running.
    pub listening: bool,
    /// Completed polls.
    pub polls: u64,
    /// Messages received since startup.
    pub messages_received: u64,
    /// Events dispatched since startup.
    pub events_dispatched: u64,
    /// Messages dropped as undecodable.
    pub decode_failures: u64,
    /// Own events skipped.
    pub echoes_skipped: u64,
    /// Failed receive calls.
    pub receive_failures: u64,
    /// Kinds with a registered raw handler.
    pub custom_handlers: Vec<EventKind>,
    /// Time of the last completed poll.
    pub last_poll_at: Option<DateTime<Utc>>,
}

enum MessageOutcome {
    Dispatched,
    Echo,
    Undecodable,
}

#[derive(Debug, Default)]
struct Counters {
    polls: AtomicU64,
    received: AtomicU64,
    dispatched: AtomicU64,
    decode_failures: AtomicU64,
    echoes: AtomicU64,
    receive_failures: AtomicU64,
}

struct PollTask {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Polls a bus queue and feeds the local dispatcher.
pub struct EventListener {
    bus: Arc<dyn NotificationBus>,
    dispatcher: Arc<EventDispatcher>,
    echoes: Arc<EchoFilter>,
    config: ListenerConfig,
    custom_handlers: RwLock<HashMap<EventKind, RawHandler>>,
    task: Mutex<Option<PollTask>>,
    counters: Counters,
    last_poll_at: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener")
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl EventListener {
    /// Create a listener. Call [`Self::start`] to begin polling.
    #[must_use]
    pub fn new(
        bus: Arc<dyn NotificationBus>,
        dispatcher: Arc<EventDispatcher>,
        echoes: Arc<EchoFilter>,
        config: ListenerConfig,
    ) -> Self {
        let queue = config.queue.clone().filter(|q| !q.trim().is_empty());
        Self {
            bus,
            dispatcher,
            echoes,
            config: ListenerConfig { queue, ..config },
            custom_handlers: RwLock::new(HashMap::new()),
            task: Mutex::new(None),
            counters: Counters::default(),
            last_poll_at: Mutex::new(None),
        }
    }

    /// Register the raw handler for `kind`, replacing any previous one.
    ///
    /// Returns whether a handler was replaced.
    pub fn register_custom_handler<F>(&self, kind: EventKind, handler: F) -> bool
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let replaced = self
            .custom_handlers
            .write()
            .insert(kind, Arc::new(handler))
            .is_some();
        tracing::debug!(kind = %kind, replaced, "Registered custom event handler");
        replaced
    }

    /// Remove the raw handler for `kind`. Returns whether one was registered.
    pub fn unregister_custom_handler(&self, kind: EventKind) -> bool {
        self.custom_handlers.write().remove(&kind).is_some()
    }

    /// Spawn the poll task. Returns `false` if no queue is configured or
    /// the task is already running.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) -> bool {
        let Some(queue) = self.config.queue.clone() else {
            tracing::warn!("No event queue configured, listener not started");
            return false;
        };

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.join.is_finished()) {
            return false;
        }

        let cancel = parent.child_token();
        let listener = Arc::clone(self);
        let loop_cancel = cancel.clone();
        let join = tokio::spawn(async move { listener.run(queue, loop_cancel).await });
        *task = Some(PollTask { cancel, join });
        true
    }

    /// Stop the poll task, aborting it after the configured timeout.
    ///
    /// Returns whether a task was running.
    pub async fn stop(&self) -> bool {
        let task = self.task.lock().take();
        let Some(mut task) = task else {
            return false;
        };
        task.cancel.cancel();
        if tokio::time::timeout(self.config.stop_timeout, &mut task.join)
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = self.config.stop_timeout.as_secs(),
                "Event listener did not stop in time, aborting"
            );
            task.join.abort();
            let _ = task.join.await;
        }
        true
    }

    /// Whether the poll task is running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.join.is_finished())
    }

    /// Listener counters and state.
    #[must_use]
    pub fn status(&self) -> ListenerStatus {
        let mut custom_handlers: Vec<EventKind> =
            self.custom_handlers.read().keys().copied().collect();
        custom_handlers.sort_unstable();
        ListenerStatus {
            queue: self.config.queue.clone(),
            listening: self.is_listening(),
            polls: self.counters.polls.load(Ordering::Relaxed),
            messages_received: self.counters.received.load(Ordering::Relaxed),
            events_dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            echoes_skipped: self.counters.echoes.load(Ordering::Relaxed),
            receive_failures: self.counters.receive_failures.load(Ordering::Relaxed),
            custom_handlers,
            last_poll_at: *self.last_poll_at.lock(),
        }
    }

    async fn run(&self, queue: String, cancel: CancellationToken) {
        tracing::info!(
            queue = %queue,
            interval_secs = self.config.poll_interval.as_secs(),
            "Event listener started"
        );
        loop {
            // A started batch is finished and acknowledged before exiting.
            if cancel.is_cancelled() {
                break;
            }
            self.poll_queue(&queue).await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!(queue = %queue, "Event listener stopped");
    }

    /// Receive and process one batch. Returns an empty summary without a queue.
    pub async fn poll_once(&self) -> PollSummary {
        match self.config.queue.clone() {
            Some(queue) => self.poll_queue(&queue).await,
            None => PollSummary::default(),
        }
    }

    async fn poll_queue(&self, queue: &str) -> PollSummary {
        let mut summary = PollSummary::default();
        let messages = match self.bus.receive(queue, self.config.batch_size.max(1)).await {
            Ok(messages) => messages,
            Err(e) => {
                self.counters.receive_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(queue = %queue, error = %e, "Failed to receive events");
                return summary;
            }
        };

        summary.received = messages.len();
        self.counters
            .received
            .fetch_add(messages.len() as u64, Ordering::Relaxed);

        for message in messages {
            match self.process_message(&message) {
                MessageOutcome::Dispatched => summary.dispatched += 1,
                MessageOutcome::Echo => summary.echoes += 1,
                MessageOutcome::Undecodable => summary.undecodable += 1,
            }
            if let Err(e) = self.bus.acknowledge(queue, &message.receipt).await {
                summary.ack_failures += 1;
                tracing::warn!(
                    queue = %queue,
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to acknowledge message"
                );
            }
        }

        self.counters.polls.fetch_add(1, Ordering::Relaxed);
        *self.last_poll_at.lock() = Some(Utc::now());
        if summary.received > 0 {
            tracing::debug!(
                received = summary.received,
                dispatched = summary.dispatched,
                "Processed event batch"
            );
        }
        summary
    }

    fn process_message(&self, message: &InboundMessage) -> MessageOutcome {
        let envelope = match serde_json::from_str::<Value>(&message.body).map(unwrap_fanout) {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(e)) | Err(e) => {
                return self.undecodable(message, &e.to_string());
            }
        };

        if envelope
            .get("event_id")
            .and_then(Value::as_str)
            .is_some_and(|id| self.echoes.contains(id))
        {
            self.counters.echoes.fetch_add(1, Ordering::Relaxed);
            observability::record_event_received(Outcome::Skipped);
            return MessageOutcome::Echo;
        }

        let raw = self.has_custom_handlers().then(|| envelope.clone());
        match decode_value(envelope) {
            Ok(event) => {
                let kind = event.kind();
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                observability::record_event_received(Outcome::Success);
                tracing::debug!(
                    kind = %event.kind(),
                    source = %event.source(),
                    event_id = event.id(),
                    "Received event"
                );
                self.dispatcher.publish(event);
                if let Some(raw) = raw {
                    self.run_custom_handler(kind, &raw);
                }
                MessageOutcome::Dispatched
            }
            Err(DecodeError::UnknownEventKind(kind)) => {
                self.undecodable(message, &format!("unknown event kind {kind}"))
            }
            Err(e) => self.undecodable(message, &e.to_string()),
        }
    }

    fn has_custom_handlers(&self) -> bool {
        !self.custom_handlers.read().is_empty()
    }

    fn run_custom_handler(&self, kind: EventKind, envelope: &Value) {
        let Some(handler) = self.custom_handlers.read().get(&kind).cloned() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
            tracing::error!(kind = %kind, "Custom event handler panicked");
        }
    }

    fn undecodable(&self, message: &InboundMessage, reason: &str) -> MessageOutcome {
        self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
        observability::record_event_received(Outcome::Failure);
        tracing::warn!(
            message_id = %message.message_id,
            reason,
            "Dropping undecodable event message"
        );
        MessageOutcome::Undecodable
    }
}

/// Unwrap a fan-out envelope whose `Message` field holds the event JSON.
fn unwrap_fanout(value: Value) -> Result<Value, serde_json::Error> {
    match value.get("Message").and_then(Value::as_str) {
        Some(inner) if value.get("event_type").is_none() => serde_json::from_str(inner),
        _ => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::domain::events::{Event, EventKind, serialize};
    use crate::infrastructure::bus::InMemoryBus;
    use crate::infrastructure::bus::publisher::outbound_message;

    struct Fixture {
        bus: Arc<InMemoryBus>,
        dispatcher: Arc<EventDispatcher>,
        echoes: Arc<EchoFilter>,
        listener: Arc<EventListener>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(InMemoryBus::new());
        bus.bind("events", "driver");
        let dispatcher = Arc::new(EventDispatcher::default());
        let echoes = Arc::new(EchoFilter::default());
        let listener = Arc::new(EventListener::new(
            Arc::clone(&bus) as Arc<dyn NotificationBus>,
            Arc::clone(&dispatcher),
            Arc::clone(&echoes),
            ListenerConfig {
                queue: Some("driver".to_string()),
                poll_interval: Duration::from_secs(1),
                ..ListenerConfig::default()
            },
        ));
        Fixture {
            bus,
            dispatcher,
            echoes,
            listener,
        }
    }

    async fn publish_raw(bus: &InMemoryBus, body: String) {
        let mut message = outbound_message(&Event::tick_generated("A", 1.0, 0.0, 1)).unwrap();
        message.body = body;
        bus.publish("events", message).await.unwrap();
    }

    #[tokio::test]
    async fn dispatches_peer_events_and_acknowledges() {
        let f = fixture();
        let event = Event::threshold_reached(30, 30, vec!["AAPL".into()]);
        f.bus
            .publish("events", outbound_message(&event).unwrap())
            .await
            .unwrap();

        let summary = f.listener.poll_once().await;
        assert_eq!(summary.received, 1);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(f.bus.in_flight("driver"), 0);

        let history = f.dispatcher.history(Some(EventKind::DataThresholdReached), 10);
        assert_eq!(history[0].id(), event.id());
    }

    #[tokio::test]
    async fn skips_own_echoes() {
        let f = fixture();
        let event = Event::streaming_started(2, 1.0, vec!["A".into(), "B".into()]);
        f.echoes.remember(event.id());
        f.bus
            .publish("events", outbound_message(&event).unwrap())
            .await
            .unwrap();

        let summary = f.listener.poll_once().await;
        assert_eq!(summary.echoes, 1);
        assert_eq!(f.dispatcher.history_len(), 0);
        assert_eq!(f.bus.in_flight("driver"), 0);
    }

    #[tokio::test]
    async fn unwraps_fanout_envelope() {
        let f = fixture();
        let event = Event::stock_data_loaded("AAPL", 1, "2024-01-02", 10.0);
        let inner = String::from_utf8(serialize(&event).unwrap()).unwrap();
        let wrapped = serde_json::json!({"Type": "Notification", "Message": inner}).to_string();
        publish_raw(&f.bus, wrapped).await;

        assert_eq!(f.listener.poll_once().await.dispatched, 1);
        assert_eq!(f.dispatcher.history(None, 10)[0].id(), event.id());
    }

    #[tokio::test]
    async fn drops_unknown_and_malformed_messages() {
        let f = fixture();
        publish_raw(&f.bus, "not json".to_string()).await;
        publish_raw(
            &f.bus,
            serde_json::json!({"event_type": "market_closed", "metadata": {}}).to_string(),
        )
        .await;

        let summary = f.listener.poll_once().await;
        assert_eq!(summary.received, 2);
        assert_eq!(summary.undecodable, 2);
        assert_eq!(f.bus.in_flight("driver"), 0);
        assert_eq!(f.listener.status().decode_failures, 2);
    }

    fn counting_handler(listener: &EventListener, kind: EventKind) -> Arc<AtomicUsize> {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        listener.register_custom_handler(kind, move |envelope| {
            assert_eq!(
                envelope.get("event_type").and_then(Value::as_str),
                Some(kind.as_str())
            );
            counter.fetch_add(1, Ordering::SeqCst);
        });
        seen
    }

    #[tokio::test]
    async fn custom_handler_runs_only_for_its_kind_after_dispatch() {
        let f = fixture();
        let ticks = counting_handler(&f.listener, EventKind::TickGenerated);
        let loads = counting_handler(&f.listener, EventKind::StockDataLoaded);

        let dispatcher = Arc::clone(&f.dispatcher);
        let seen_in_history = Arc::new(AtomicUsize::new(0));
        let history_count = Arc::clone(&seen_in_history);
        f.listener
            .register_custom_handler(EventKind::DataThresholdReached, move |_| {
                let dispatched = dispatcher.history(Some(EventKind::DataThresholdReached), 10);
                history_count.store(dispatched.len(), Ordering::SeqCst);
            });

        for event in [
            Event::tick_generated("A", 1.0, 0.0, 1),
            Event::tick_generated("B", 2.0, 0.0, 2),
            Event::threshold_reached(30, 30, vec!["AAPL".into()]),
        ] {
            f.bus
                .publish("events", outbound_message(&event).unwrap())
                .await
                .unwrap();
        }

        assert_eq!(f.listener.poll_once().await.dispatched, 3);
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(seen_in_history.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.listener.status().custom_handlers,
            vec![
                EventKind::StockDataLoaded,
                EventKind::DataThresholdReached,
                EventKind::TickGenerated
            ]
        );
    }

    #[tokio::test]
    async fn undecodable_and_unknown_messages_reach_no_handler() {
        let f = fixture();
        let counters: Vec<Arc<AtomicUsize>> = EventKind::ALL
            .iter()
            .map(|kind| counting_handler(&f.listener, *kind))
            .collect();

        publish_raw(&f.bus, "not json".to_string()).await;
        publish_raw(
            &f.bus,
            serde_json::json!({"event_type": "market_closed", "metadata": {}}).to_string(),
        )
        .await;
        publish_raw(
            &f.bus,
            serde_json::json!({"event_type": "tick_generated", "event_source": "driver"})
                .to_string(),
        )
        .await;
        let echo = Event::tick_generated("A", 1.0, 0.0, 1);
        f.echoes.remember(echo.id());
        f.bus
            .publish("events", outbound_message(&echo).unwrap())
            .await
            .unwrap();

        let summary = f.listener.poll_once().await;
        assert_eq!(summary.undecodable, 3);
        assert_eq!(summary.echoes, 1);
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 0));
    }

    #[tokio::test]
    async fn handler_panics_are_isolated_and_handlers_replace_per_kind() {
        let f = fixture();
        assert!(!f.listener.register_custom_handler(EventKind::TickGenerated, |_| {
            panic!("handler bug")
        }));

        let event = Event::tick_generated("A", 1.0, 0.0, 1);
        f.bus
            .publish("events", outbound_message(&event).unwrap())
            .await
            .unwrap();
        assert_eq!(f.listener.poll_once().await.dispatched, 1);
        assert_eq!(f.dispatcher.history_len(), 1);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        assert!(f.listener.register_custom_handler(EventKind::TickGenerated, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        f.bus
            .publish("events", outbound_message(&event).unwrap())
            .await
            .unwrap();
        f.listener.poll_once().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(f.listener.unregister_custom_handler(EventKind::TickGenerated));
        assert!(!f.listener.unregister_custom_handler(EventKind::TickGenerated));
        assert!(f.listener.status().custom_handlers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_polls_until_stopped() {
        let f = fixture();
        let root = CancellationToken::new();
        assert!(f.listener.start(&root));
        assert!(!f.listener.start(&root));
        assert!(f.listener.is_listening());

        let event = Event::tick_generated("A", 1.0, 0.0, 1);
        f.bus
            .publish("events", outbound_message(&event).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(f.dispatcher.history_len(), 1);

        assert!(f.listener.stop().await);
        assert!(!f.listener.is_listening());
        assert!(!f.listener.stop().await);
    }

    #[tokio::test]
    async fn no_queue_means_no_listening() {
        let listener = Arc::new(EventListener::new(
            Arc::new(InMemoryBus::new()),
            Arc::new(EventDispatcher::default()),
            Arc::new(EchoFilter::default()),
            ListenerConfig::default(),
        ));
        assert!(!listener.start(&CancellationToken::new()));
        assert_eq!(listener.poll_once().await, PollSummary::default());
    }
}
