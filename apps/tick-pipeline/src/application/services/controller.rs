//! Threshold-Gated Streaming Controller
//!
//! Owns the [`ThresholdState`] inside a single mediator task. Three
//! producers feed its inbox:
//!
//! - dispatcher handlers for `stock_data_loaded` and `data_threshold_reached`
//!   events (low-latency trigger)
//! - a poller that periodically compares the authoritative symbol count
//!   against the threshold (liveness fallback)
//! - explicit start/stop commands from the HTTP API
//!
//! Entering the streaming phase starts exactly one tick loop and emits a
//! `streaming_started` event. Readers observe the controller through a
//! [`ControllerSnapshot`] published on a `watch` channel after every command.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{EventDispatcher, HandlerError, SubscriptionId};
use super::emitter::EventEmitter;
use super::streamer::{StreamHandle, StreamerStats, TickStreamer};
use crate::application::ports::{ReadyCheckpoint, SymbolSource, ThresholdStore};
use crate::domain::events::{Event, EventKind, EventPayload, EventSource, Severity};
use crate::domain::threshold::{StartReason, StreamingPhase, ThresholdState, Transition};
use crate::domain::tick::Ticker;
use crate::observability;

/// Service name used in events emitted by the controller.
pub const CONTROLLER_SERVICE_NAME: &str = "streaming-controller";

/// `streaming_stopped` reason for an explicit stop.
pub const STOP_REASON_REQUESTED: &str = "requested";
/// `streaming_stopped` reason when a new start replaces the live loop.
pub const STOP_REASON_RESTART: &str = "restart";
/// `streaming_stopped` reason when the controller exits.
pub const STOP_REASON_SHUTDOWN: &str = "shutdown";

// =============================================================================
// Configuration
// =============================================================================

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Ready symbols required before streaming starts.
    pub threshold: usize,
    /// Interval of the authoritative count poll.
    pub poll_interval: Duration,
    /// Inbox capacity.
    pub inbox_capacity: usize,
    /// How long a stopping tick loop may take before it is aborted.
    pub stop_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            threshold: 30,
            poll_interval: Duration::from_secs(10),
            inbox_capacity: 256,
            stop_grace: Duration::from_secs(2),
        }
    }
}

/// Collaborators of the controller.
#[derive(Clone)]
pub struct ControllerDeps {
    /// Authoritative symbol store.
    pub symbol_source: Arc<dyn SymbolSource>,
    /// Ready set persistence.
    pub store: Arc<dyn ThresholdStore>,
    /// Tick loop factory.
    pub streamer: TickStreamer,
    /// Event output.
    pub emitter: EventEmitter,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    /// Current phase.
    pub phase: StreamingPhase,
    /// Whether the tick loop is running.
    pub is_streaming: bool,
    /// Whether automatic triggers may start streaming.
    pub armed: bool,
    /// Ready symbol count.
    pub ready_count: usize,
    /// Required ready symbols.
    pub required_threshold: usize,
    /// Ready symbols, sorted.
    pub ready_symbols: Vec<String>,
    /// Sleep between sweeps, in seconds.
    pub tick_interval_secs: f64,
    /// Tickers in the running loop.
    pub streamed_symbols: usize,
    /// When the running loop started.
    pub streaming_since: Option<DateTime<Utc>>,
    /// Why the most recent loop started.
    pub last_start_reason: Option<StartReason>,
}

// =============================================================================
// Handle
// =============================================================================

/// Controller error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// Mediator task has exited.
    #[error("streaming controller is not running")]
    Unavailable,

    /// Inbox is full.
    #[error("streaming controller inbox is full")]
    Busy,
}

enum Command {
    SymbolLoaded { symbol: String, price: f64 },
    PeerThreshold { symbols: Vec<String> },
    Polled { count: usize, listing: Vec<String> },
    Start(oneshot::Sender<ControllerSnapshot>),
    Stop(oneshot::Sender<ControllerSnapshot>),
}

/// Cloneable handle to the controller task.
#[derive(Clone)]
pub struct StreamingController {
    inbox: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ControllerSnapshot>,
    streamer: TickStreamer,
}

impl std::fmt::Debug for StreamingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingController")
            .field("snapshot", &*self.snapshots.borrow())
            .finish_non_exhaustive()
    }
}

impl StreamingController {
    /// Restore the ready set, then spawn the mediator and poller tasks.
    ///
    /// Returns the handle and the mediator's join handle. Both tasks exit
    /// when `cancel` fires; the running tick loop is stopped first.
    pub async fn spawn(
        config: ControllerConfig,
        deps: ControllerDeps,
        cancel: &CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let restored = match deps.store.load().await {
            Ok(Some(checkpoint)) => {
                tracing::info!(
                    symbols = checkpoint.ready_symbols.len(),
                    saved_at = %checkpoint.saved_at,
                    "Restored ready symbols"
                );
                checkpoint.ready_symbols
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load ready symbols, starting empty");
                Vec::new()
            }
        };

        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(ControllerSnapshot::default());

        let mediator = Mediator {
            state: ThresholdState::restore(config.threshold, restored),
            learned: BTreeMap::new(),
            stream: None,
            streaming_since: None,
            last_start_reason: None,
            snapshot_tx,
            cancel: cancel.child_token(),
            config: config.clone(),
            deps: deps.clone(),
        };
        mediator.publish_snapshot();

        let join = tokio::spawn(mediator.run(inbox_rx));

        tokio::spawn(run_poller(
            inbox_tx.clone(),
            snapshot_rx.clone(),
            Arc::clone(&deps.symbol_source),
            config.poll_interval,
            cancel.child_token(),
        ));

        let handle = Self {
            inbox: inbox_tx,
            snapshots: snapshot_rx,
            streamer: deps.streamer,
        };
        (handle, join)
    }

    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Whether the controller is in the streaming phase.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.snapshots.borrow().is_streaming
    }

    /// Receiver notified after every state change.
    #[must_use]
    pub fn subscribe_snapshots(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshots.clone()
    }

    /// Whether the mediator task is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.inbox.is_closed()
    }

    /// Tick loop counters.
    #[must_use]
    pub fn streamer_stats(&self) -> StreamerStats {
        self.streamer.stats()
    }

    /// Re-arm automatic triggers and start streaming if tickers are known.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Unavailable` if the mediator has exited.
    pub async fn start(&self) -> Result<ControllerSnapshot, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Command::Start(reply))
            .await
            .map_err(|_| ControllerError::Unavailable)?;
        response.await.map_err(|_| ControllerError::Unavailable)
    }

    /// Stop streaming and disarm automatic triggers.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Unavailable` if the mediator has exited.
    pub async fn stop(&self) -> Result<ControllerSnapshot, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Command::Stop(reply))
            .await
            .map_err(|_| ControllerError::Unavailable)?;
        response.await.map_err(|_| ControllerError::Unavailable)
    }

    /// Report a symbol whose data finished loading. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Busy` if the inbox is full and
    /// `ControllerError::Unavailable` if the mediator has exited.
    pub fn notify_symbol_loaded(&self, symbol: String, price: f64) -> Result<(), ControllerError> {
        self.try_send(Command::SymbolLoaded { symbol, price })
    }

    /// Report a peer's threshold announcement. Never blocks.
    ///
    /// # Errors
    ///
    /// Same as [`Self::notify_symbol_loaded`].
    pub fn notify_peer_threshold(&self, symbols: Vec<String>) -> Result<(), ControllerError> {
        self.try_send(Command::PeerThreshold { symbols })
    }

    /// Subscribe the controller to readiness events on `dispatcher`.
    pub fn attach(&self, dispatcher: &EventDispatcher) -> Vec<(EventKind, SubscriptionId)> {
        let loaded = self.clone();
        let loaded_id = dispatcher.subscribe(EventKind::StockDataLoaded, move |event| {
            if let EventPayload::StockDataLoaded(p) = event.payload() {
                loaded
                    .notify_symbol_loaded(p.symbol.clone(), p.latest_price)
                    .map_err(|e| HandlerError::new(e.to_string()))?;
            }
            Ok(())
        });

        let peer = self.clone();
        let peer_id = dispatcher.subscribe(EventKind::DataThresholdReached, move |event| {
            if let EventPayload::ThresholdReached(p) = event.payload() {
                peer.notify_peer_threshold(p.symbols.clone())
                    .map_err(|e| HandlerError::new(e.to_string()))?;
            }
            Ok(())
        });

        vec![
            (EventKind::StockDataLoaded, loaded_id),
            (EventKind::DataThresholdReached, peer_id),
        ]
    }

    fn try_send(&self, command: Command) -> Result<(), ControllerError> {
        self.inbox.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ControllerError::Busy,
            mpsc::error::TrySendError::Closed(_) => ControllerError::Unavailable,
        })
    }
}

// =============================================================================
// Mediator Task
// =============================================================================

struct Mediator {
    state: ThresholdState,
    learned: BTreeMap<String, Ticker>,
    stream: Option<StreamHandle>,
    streaming_since: Option<DateTime<Utc>>,
    last_start_reason: Option<StartReason>,
    snapshot_tx: watch::Sender<ControllerSnapshot>,
    cancel: CancellationToken,
    config: ControllerConfig,
    deps: ControllerDeps,
}

impl Mediator {
    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        tracing::info!(
            threshold = self.state.threshold(),
            ready = self.state.ready_count(),
            "Streaming controller started"
        );

        let transition = self.state.evaluate();
        self.apply(transition).await;
        self.publish_snapshot();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = inbox.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        self.state.stop();
        self.stop_stream(STOP_REASON_SHUTDOWN).await;
        self.publish_snapshot();
        tracing::info!("Streaming controller stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SymbolLoaded { symbol, price } => {
                self.learn_price(&symbol, price);
                let before = self.state.ready_count();
                let transition = self.state.add_symbols([symbol.clone()]);
                if self.state.ready_count() > before {
                    tracing::info!(
                        symbol = %symbol,
                        ready = self.state.ready_count(),
                        threshold = self.state.threshold(),
                        "Symbol ready"
                    );
                }
                self.after_input(before, transition).await;
            }
            Command::PeerThreshold { symbols } => {
                tracing::info!(symbols = symbols.len(), "Peer reported data threshold");
                let before = self.state.ready_count();
                let transition = self.state.peer_threshold(symbols);
                self.after_input(before, transition).await;
            }
            Command::Polled { count, listing } => {
                let before = self.state.ready_count();
                let transition = self.state.polled(count, listing);
                if matches!(transition, Transition::StartStreaming(_)) {
                    tracing::info!(
                        count,
                        threshold = self.state.threshold(),
                        "Symbol count reached threshold"
                    );
                }
                self.after_input(before, transition).await;
            }
            Command::Start(reply) => {
                let transition = self.state.start();
                self.apply(transition).await;
                self.publish_snapshot();
                let _ = reply.send(self.snapshot());
            }
            Command::Stop(reply) => {
                let was_streaming = self.state.stop();
                self.publish_snapshot();
                self.stop_stream(STOP_REASON_REQUESTED).await;
                self.publish_snapshot();
                if was_streaming {
                    tracing::info!("Streaming stopped");
                }
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn after_input(&mut self, before: usize, transition: Transition) {
        if self.state.ready_count() != before {
            self.persist().await;
        }
        if transition == Transition::EnteredAccumulating {
            tracing::info!("Accumulating ready symbols");
        }
        let threshold = self.state.threshold();
        if !self.state.is_armed() && before < threshold && self.state.ready_count() >= threshold {
            tracing::info!(ready = self.state.ready_count(), "Threshold met while stopped");
            let ready: Vec<String> = self.state.ready_symbols().iter().cloned().collect();
            self.deps.emitter.emit(Event::streaming_ready(ready)).await;
        }
        self.apply(transition).await;
        self.publish_snapshot();
    }

    async fn apply(&mut self, transition: Transition) {
        if let Transition::StartStreaming(reason) = transition {
            self.start_stream(reason).await;
        }
    }

    async fn start_stream(&mut self, reason: StartReason) {
        // At most one loop: the previous one is fully gone before spawning.
        self.stop_stream(STOP_REASON_RESTART).await;

        let tickers = self.load_tickers().await;
        if tickers.is_empty() {
            tracing::error!(reason = reason.as_str(), "No ticker data available, streaming not started");
            self.state.abort_start();
            self.deps
                .emitter
                .emit(
                    Event::error(
                        "no_tickers",
                        "streaming requested but no ticker data is available",
                        CONTROLLER_SERVICE_NAME,
                        Severity::High,
                    )
                    .with_source(EventSource::Driver),
                )
                .await;
            return;
        }

        let symbols: Vec<String> = tickers.iter().map(|t| t.symbol.clone()).collect();
        self.stream = Some(self.deps.streamer.spawn(tickers, &self.cancel));
        self.streaming_since = Some(Utc::now());
        self.last_start_reason = Some(reason);
        observability::set_streaming(true);

        tracing::info!(
            reason = reason.as_str(),
            symbols = symbols.len(),
            ready = self.state.ready_count(),
            "Streaming started"
        );

        if matches!(reason, StartReason::ThresholdMet | StartReason::Poll) {
            let ready: Vec<String> = self.state.ready_symbols().iter().cloned().collect();
            self.deps
                .emitter
                .emit(Event::threshold_reached(
                    ready.len() as u64,
                    self.state.threshold() as u64,
                    ready,
                ))
                .await;
        }

        self.deps
            .emitter
            .emit(Event::streaming_started(
                symbols.len() as u64,
                self.deps.streamer.tick_interval().as_secs_f64(),
                symbols,
            ))
            .await;
    }

    async fn stop_stream(&mut self, reason: &str) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let symbols = stream.symbols() as u64;
        let ticks = stream.shutdown(self.config.stop_grace).await;
        self.streaming_since = None;
        observability::set_streaming(false);

        tracing::info!(reason, ticks, symbols, "Streaming session ended");
        self.deps
            .emitter
            .emit(Event::streaming_stopped(reason, ticks, symbols))
            .await;
    }

    async fn load_tickers(&self) -> Vec<Ticker> {
        match self.deps.symbol_source.tickers().await {
            Ok(tickers) if !tickers.is_empty() => return tickers,
            Ok(_) => tracing::debug!("Symbol source has no tickers, using learned prices"),
            Err(e) => tracing::warn!(error = %e, "Symbol source unavailable, using learned prices"),
        }
        self.learned.values().cloned().collect()
    }

    fn learn_price(&mut self, symbol: &str, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        self.learned
            .entry(symbol.to_string())
            .and_modify(|t| t.base_price = price)
            .or_insert_with(|| Ticker::new(symbol, price, 0));
    }

    async fn persist(&self) {
        let checkpoint =
            ReadyCheckpoint::now(self.state.ready_symbols().iter().cloned().collect());
        if let Err(e) = self.deps.store.save(&checkpoint).await {
            tracing::warn!(error = %e, "Failed to persist ready symbols");
        }
    }

    fn snapshot(&self) -> ControllerSnapshot {
        let streaming = self.state.is_streaming() && self.stream.is_some();
        ControllerSnapshot {
            phase: self.state.phase(),
            is_streaming: self.state.is_streaming(),
            armed: self.state.is_armed(),
            ready_count: self.state.ready_count(),
            required_threshold: self.state.threshold(),
            ready_symbols: self.state.ready_symbols().iter().cloned().collect(),
            tick_interval_secs: self.deps.streamer.tick_interval().as_secs_f64(),
            streamed_symbols: if streaming {
                self.stream.as_ref().map_or(0, StreamHandle::symbols)
            } else {
                0
            },
            streaming_since: self.streaming_since,
            last_start_reason: self.last_start_reason,
        }
    }

    fn publish_snapshot(&self) {
        observability::set_ready_symbols(self.state.ready_count());
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

// =============================================================================
// Poller
// =============================================================================

async fn run_poller(
    inbox: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ControllerSnapshot>,
    source: Arc<dyn SymbolSource>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let (streaming, armed, threshold) = {
            let snapshot = snapshots.borrow();
            (
                snapshot.is_streaming,
                snapshot.armed,
                snapshot.required_threshold,
            )
        };
        if streaming || !armed {
            continue;
        }

        let count = match source.symbol_count().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Threshold poll failed");
                continue;
            }
        };
        tracing::debug!(count, threshold, "Checked symbol threshold");
        if count < threshold {
            continue;
        }

        let listing = source.list_symbols().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to list symbols");
            Vec::new()
        });
        if inbox.send(Command::Polled { count, listing }).await.is_err() {
            break;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::{
        MockSymbolSource, NoOpEventPublisher, NoOpTickSink, SourceError, StoreError,
    };
    use crate::application::services::emitter::EchoFilter;
    use crate::domain::tick::TickGenerator;

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Option<ReadyCheckpoint>>,
    }

    #[async_trait]
    impl ThresholdStore for MemoryStore {
        async fn load(&self) -> Result<Option<ReadyCheckpoint>, StoreError> {
            Ok(self.saved.lock().clone())
        }

        async fn save(&self, checkpoint: &ReadyCheckpoint) -> Result<(), StoreError> {
            *self.saved.lock() = Some(checkpoint.clone());
            Ok(())
        }
    }

    fn deps(source: MockSymbolSource, store: Arc<MemoryStore>) -> (ControllerDeps, Arc<EventDispatcher>) {
        let dispatcher = Arc::new(EventDispatcher::default());
        let emitter = EventEmitter::new(
            Arc::clone(&dispatcher),
            Arc::new(NoOpEventPublisher),
            Arc::new(EchoFilter::default()),
        );
        let deps = ControllerDeps {
            symbol_source: Arc::new(source),
            store,
            streamer: TickStreamer::new(
                Arc::new(NoOpTickSink),
                TickGenerator::default(),
                Duration::from_millis(100),
            ),
            emitter,
        };
        (deps, dispatcher)
    }

    fn config(threshold: usize) -> ControllerConfig {
        ControllerConfig {
            threshold,
            poll_interval: Duration::from_secs(10),
            inbox_capacity: 16,
            stop_grace: Duration::from_millis(200),
        }
    }

    async fn wait_until<F>(controller: &StreamingController, predicate: F) -> ControllerSnapshot
    where
        F: FnMut(&ControllerSnapshot) -> bool,
    {
        let mut rx = controller.subscribe_snapshots();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(predicate))
            .await
            .expect("controller did not reach expected state")
            .expect("controller snapshot channel closed")
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn poll_path_starts_streaming_from_listing() {
        let mut source = MockSymbolSource::new();
        source.expect_symbol_count().returning(|| Ok(3));
        source
            .expect_list_symbols()
            .returning(|| Ok(vec!["AAPL".into(), "MSFT".into(), "NVDA".into()]));
        source
            .expect_tickers()
            .returning(|| Ok(vec![Ticker::new("AAPL", 190.0, 100)]));

        let store = Arc::new(MemoryStore::default());
        let (deps, dispatcher) = deps(source, Arc::clone(&store));
        let cancel = CancellationToken::new();
        let (controller, join) = StreamingController::spawn(config(3), deps, &cancel).await;

        let snapshot = wait_until(&controller, |s| s.is_streaming).await;
        assert_eq!(snapshot.ready_count, 3);
        assert_eq!(snapshot.last_start_reason, Some(StartReason::Poll));
        assert_eq!(snapshot.streamed_symbols, 1);
        assert_eq!(store.saved.lock().as_ref().map(|c| c.ready_symbols.len()), Some(3));
        assert_eq!(
            dispatcher.history(Some(EventKind::StreamingStarted), 10).len(),
            1
        );

        cancel.cancel();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn poll_below_threshold_keeps_accumulating() {
        let mut source = MockSymbolSource::new();
        source.expect_symbol_count().returning(|| Ok(2));
        source.expect_list_symbols().never();
        source.expect_tickers().never();

        let (deps, _dispatcher) = deps(source, Arc::new(MemoryStore::default()));
        let cancel = CancellationToken::new();
        let (controller, join) = StreamingController::spawn(config(3), deps, &cancel).await;

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!controller.is_streaming());

        cancel.cancel();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_tickers_abort_start_and_report_error() {
        let mut source = MockSymbolSource::new();
        source.expect_symbol_count().returning(|| Ok(0));
        source
            .expect_tickers()
            .returning(|| Err(SourceError::Unavailable("down".into())));

        let (deps, dispatcher) = deps(source, Arc::new(MemoryStore::default()));
        let cancel = CancellationToken::new();
        let (controller, join) = StreamingController::spawn(config(3), deps, &cancel).await;

        let snapshot = controller.start().await.unwrap();
        assert!(!snapshot.is_streaming);
        assert!(snapshot.armed);
        assert_eq!(snapshot.phase, StreamingPhase::Idle);
        assert_eq!(dispatcher.history(Some(EventKind::ErrorOccurred), 10).len(), 1);

        cancel.cancel();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn learned_prices_back_up_the_symbol_source() {
        let mut source = MockSymbolSource::new();
        source.expect_symbol_count().returning(|| Ok(0));
        source.expect_tickers().returning(|| Ok(Vec::new()));

        let (deps, dispatcher) = deps(source, Arc::new(MemoryStore::default()));
        let cancel = CancellationToken::new();
        let (controller, join) = StreamingController::spawn(config(2), deps, &cancel).await;
        controller.attach(&dispatcher);

        dispatcher.publish(Event::stock_data_loaded("AAPL", 10, "2024-01-02", 190.0));
        dispatcher.publish(Event::stock_data_loaded("MSFT", 10, "2024-01-02", 410.0));

        let snapshot = wait_until(&controller, |s| s.is_streaming).await;
        assert_eq!(snapshot.streamed_symbols, 2);
        assert_eq!(snapshot.last_start_reason, Some(StartReason::ThresholdMet));
        assert_eq!(
            dispatcher.history(Some(EventKind::DataThresholdReached), 10).len(),
            1
        );

        cancel.cancel();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn restored_checkpoint_resumes_accumulation() {
        let mut source = MockSymbolSource::new();
        source.expect_symbol_count().returning(|| Ok(0));

        let store = Arc::new(MemoryStore::default());
        *store.saved.lock() = Some(ReadyCheckpoint::now(vec!["AAPL".into(), "MSFT".into()]));
        let (deps, _dispatcher) = deps(source, store);
        let cancel = CancellationToken::new();
        let (controller, join) = StreamingController::spawn(config(5), deps, &cancel).await;

        let snapshot = wait_until(&controller, |s| s.ready_count == 2).await;
        assert_eq!(snapshot.phase, StreamingPhase::Accumulating);

        cancel.cancel();
        join.await.unwrap();
        assert!(!controller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_a_live_loop_reports_the_session() {
        let mut source = MockSymbolSource::new();
        source.expect_symbol_count().returning(|| Ok(0));
        source
            .expect_tickers()
            .returning(|| Ok(vec![Ticker::new("AAPL", 190.0, 100), Ticker::new("MSFT", 410.0, 50)]));

        let (deps, dispatcher) = deps(source, Arc::new(MemoryStore::default()));
        let cancel = CancellationToken::new();
        let (controller, join) = StreamingController::spawn(config(5), deps, &cancel).await;

        // Stopping while idle has no session to report.
        controller.stop().await.unwrap();
        assert!(dispatcher.history(Some(EventKind::StreamingStopped), 10).is_empty());

        assert!(controller.start().await.unwrap().is_streaming);
        tokio::time::sleep(Duration::from_millis(250)).await;
        controller.stop().await.unwrap();

        let stopped = dispatcher.history(Some(EventKind::StreamingStopped), 10);
        assert_eq!(stopped.len(), 1);
        let EventPayload::StreamingStopped(session) = stopped[0].payload() else {
            panic!("unexpected payload {:?}", stopped[0].payload());
        };
        assert_eq!(session.reason, STOP_REASON_REQUESTED);
        assert_eq!(session.stocks_count, 2);
        // Sweeps at 0, 100 and 200ms.
        assert_eq!(session.ticks_generated, 6);

        assert!(controller.start().await.unwrap().is_streaming);
        cancel.cancel();
        join.await.unwrap();

        let stopped = dispatcher.history(Some(EventKind::StreamingStopped), 10);
        assert_eq!(stopped.len(), 2);
        assert!(stopped.iter().any(|e| matches!(
            e.payload(),
            EventPayload::StreamingStopped(s) if s.reason == STOP_REASON_SHUTDOWN
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_met_while_stopped_announces_readiness() {
        let mut source = MockSymbolSource::new();
        source.expect_symbol_count().returning(|| Ok(0));
        source.expect_tickers().never();

        let (deps, dispatcher) = deps(source, Arc::new(MemoryStore::default()));
        let cancel = CancellationToken::new();
        let (controller, join) = StreamingController::spawn(config(2), deps, &cancel).await;
        controller.attach(&dispatcher);
        controller.stop().await.unwrap();

        dispatcher.publish(Event::stock_data_loaded("AAPL", 10, "2024-01-02", 190.0));
        dispatcher.publish(Event::stock_data_loaded("MSFT", 10, "2024-01-02", 410.0));
        dispatcher.publish(Event::stock_data_loaded("NVDA", 10, "2024-01-02", 495.0));
        wait_until(&controller, |s| s.ready_count == 3).await;

        assert!(!controller.is_streaming());
        let ready = dispatcher.history(Some(EventKind::StreamingReady), 10);
        assert_eq!(ready.len(), 1);
        let EventPayload::StreamingReady(announced) = ready[0].payload() else {
            panic!("unexpected payload {:?}", ready[0].payload());
        };
        assert_eq!(announced.stock_count, 2);

        cancel.cancel();
        join.await.unwrap();
    }
}
