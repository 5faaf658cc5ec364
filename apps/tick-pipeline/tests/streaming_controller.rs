//! Streaming Controller Integration Tests
//!
//! Threshold gating, single-loop guarantees, stop/start control and peer
//! triggers over the in-memory bus.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tick_pipeline::application::ports::{NotificationBus, SinkError, TickSink};
use tick_pipeline::application::services::{ControllerSnapshot, StockLoadedReport};
use tick_pipeline::infrastructure::bus::{InMemoryBus, outbound_message};
use tick_pipeline::infrastructure::store::MemoryThresholdStore;
use tick_pipeline::{
    Event, EventKind, EventPayload, EventSource, Pipeline, PipelineAdapters, PipelineConfig, StartReason, Tick,
    Ticker, in_memory_bus,
};

const TICK_INTERVAL: Duration = Duration::from_millis(20);
const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingSink {
    ticks: Mutex<Vec<Tick>>,
    delay: Option<Duration>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.ticks.lock().len()
    }
}

#[async_trait]
impl TickSink for RecordingSink {
    async fn send(&self, tick: &Tick) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.ticks.lock().push(tick.clone());
        Ok(())
    }
}

struct Harness {
    pipeline: Pipeline,
    sink: Arc<RecordingSink>,
    bus: Arc<InMemoryBus>,
    _cancel: CancellationToken,
}

fn test_config(threshold: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.streaming.threshold = threshold;
    config.streaming.tick_interval = TICK_INTERVAL;
    config.streaming.threshold_poll_interval = Duration::from_secs(3_600);
    config.storage.ready_symbols_path = None;
    config
}

async fn setup(config: PipelineConfig) -> Harness {
    setup_with_sink(config, RecordingSink::default()).await
}

async fn setup_with_sink(config: PipelineConfig, sink: RecordingSink) -> Harness {
    let cancel = CancellationToken::new();
    let sink = Arc::new(sink);
    let bus = Arc::new(in_memory_bus(&config));
    let adapters = PipelineAdapters {
        bus: Arc::clone(&bus) as Arc<dyn NotificationBus>,
        sink: Arc::clone(&sink) as Arc<dyn TickSink>,
        symbol_source: None,
        store: Arc::new(MemoryThresholdStore::new()),
    };
    let pipeline = Pipeline::assemble(&config, adapters, &cancel).await;
    Harness {
        pipeline,
        sink,
        bus,
        _cancel: cancel,
    }
}

fn report(symbol: &str, price: f64) -> StockLoadedReport {
    StockLoadedReport {
        symbol: symbol.to_string(),
        records_count: 250,
        latest_date: "2024-01-02".to_string(),
        latest_price: price,
        volume: Some(10_000),
    }
}

async fn load(harness: &Harness, symbols: &[&str]) {
    for (i, symbol) in symbols.iter().enumerate() {
        harness
            .pipeline
            .state
            .reporter
            .stock_loaded(report(symbol, 100.0 + i as f64))
            .await
            .unwrap();
    }
}

async fn wait_for_snapshot<F>(harness: &Harness, predicate: F) -> ControllerSnapshot
where
    F: FnMut(&ControllerSnapshot) -> bool,
{
    let mut snapshots = harness.pipeline.state.controller.subscribe_snapshots();
    timeout(WAIT, snapshots.wait_for(predicate))
        .await
        .expect("controller did not reach the expected state")
        .expect("controller snapshot channel closed")
        .clone()
}

async fn wait_for_ticks(harness: &Harness, at_least: usize) {
    timeout(WAIT, async {
        while harness.sink.count() < at_least {
            tokio::time::sleep(TICK_INTERVAL).await;
        }
    })
    .await
    .expect("tick loop produced no ticks");
}

fn history_count(harness: &Harness, kind: EventKind) -> usize {
    harness
        .pipeline
        .state
        .emitter
        .dispatcher()
        .history(Some(kind), 1_000)
        .len()
}

#[tokio::test]
async fn test_threshold_starts_exactly_one_stream() {
    let harness = setup(test_config(5)).await;

    load(&harness, &["AAPL", "MSFT", "GOOG", "AMZN", "NVDA"]).await;

    let snapshot = wait_for_snapshot(&harness, |s| s.is_streaming).await;
    assert_eq!(snapshot.ready_count, 5);
    assert_eq!(snapshot.last_start_reason, Some(StartReason::ThresholdMet));

    wait_for_ticks(&harness, 10).await;

    // A late symbol must not start a second loop.
    load(&harness, &["META"]).await;
    wait_for_snapshot(&harness, |s| s.ready_count == 6).await;
    tokio::time::sleep(TICK_INTERVAL * 3).await;

    assert_eq!(history_count(&harness, EventKind::StreamingStarted), 1);
    assert_eq!(history_count(&harness, EventKind::DataThresholdReached), 1);
    assert_eq!(harness.pipeline.state.controller.streamer_stats().active_loops, 1);

    let loaded = ["AAPL", "MSFT", "GOOG", "AMZN", "NVDA"];
    assert!(
        harness
            .sink
            .ticks
            .lock()
            .iter()
            .all(|t| loaded.contains(&t.symbol.as_str()) || t.symbol == "META")
    );

    harness.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_below_threshold_stays_idle() {
    let harness = setup(test_config(5)).await;

    load(&harness, &["AAPL", "MSFT", "GOOG", "AMZN"]).await;
    let snapshot = wait_for_snapshot(&harness, |s| s.ready_count == 4).await;
    tokio::time::sleep(TICK_INTERVAL * 5).await;

    assert!(!snapshot.is_streaming);
    assert!(!harness.pipeline.state.controller.is_streaming());
    assert_eq!(harness.sink.count(), 0);
    assert_eq!(history_count(&harness, EventKind::StreamingStarted), 0);

    harness.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_duplicate_symbols_count_once() {
    let harness = setup(test_config(3)).await;

    load(&harness, &["AAPL", "AAPL", "aapl", "MSFT"]).await;
    let snapshot = wait_for_snapshot(&harness, |s| s.ready_count == 2).await;
    tokio::time::sleep(TICK_INTERVAL * 3).await;

    assert!(!snapshot.is_streaming);
    assert_eq!(snapshot.ready_symbols, vec!["AAPL", "MSFT"]);

    harness.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_stop_halts_ticks_and_start_resumes() {
    let harness = setup(test_config(2)).await;
    let controller = harness.pipeline.state.controller.clone();

    load(&harness, &["AAPL", "MSFT"]).await;
    wait_for_snapshot(&harness, |s| s.is_streaming).await;
    wait_for_ticks(&harness, 4).await;

    let stopped = controller.stop().await.unwrap();
    assert!(!stopped.is_streaming);
    assert!(!stopped.armed);

    let after_stop = harness.sink.count();
    tokio::time::sleep(TICK_INTERVAL * 2).await;
    assert_eq!(harness.sink.count(), after_stop);
    assert_eq!(controller.streamer_stats().active_loops, 0);

    let stopped_events = harness
        .pipeline
        .state
        .emitter
        .dispatcher()
        .history(Some(EventKind::StreamingStopped), 10);
    assert_eq!(stopped_events.len(), 1);
    let EventPayload::StreamingStopped(session) = stopped_events[0].payload() else {
        panic!("unexpected payload {:?}", stopped_events[0].payload());
    };
    assert_eq!(session.reason, "requested");
    assert_eq!(session.stocks_count, 2);
    assert_eq!(session.ticks_generated, after_stop as u64);

    // Disarmed: new symbols do not restart streaming.
    load(&harness, &["GOOG"]).await;
    wait_for_snapshot(&harness, |s| s.ready_count == 3).await;
    tokio::time::sleep(TICK_INTERVAL * 3).await;
    assert!(!controller.is_streaming());

    let started = controller.start().await.unwrap();
    assert!(started.is_streaming);
    assert_eq!(started.last_start_reason, Some(StartReason::Manual));
    wait_for_ticks(&harness, after_stop + 3).await;

    assert_eq!(history_count(&harness, EventKind::StreamingStarted), 2);
    assert_eq!(controller.streamer_stats().active_loops, 1);

    harness.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_peer_threshold_over_bus_starts_streaming() {
    let mut config = test_config(30);
    config.source.seed_symbols = vec![
        Ticker::new("AAPL", 189.5, 1_000),
        Ticker::new("MSFT", 410.2, 1_000),
    ];
    let harness = setup(config).await;

    let peer_event = Event::threshold_reached(30, 30, vec!["AAPL".into(), "MSFT".into()])
        .with_source(EventSource::Driver);
    harness
        .bus
        .publish("pipeline-events", outbound_message(&peer_event).unwrap())
        .await
        .unwrap();

    let summary = harness.pipeline.state.listener.poll_once().await;
    assert_eq!(summary.received, 1);
    assert_eq!(summary.dispatched, 1);

    let snapshot = wait_for_snapshot(&harness, |s| s.is_streaming).await;
    assert_eq!(snapshot.last_start_reason, Some(StartReason::PeerThreshold));
    assert_eq!(snapshot.streamed_symbols, 2);

    // Only the peer's announcement; a peer trigger is not re-announced.
    assert_eq!(history_count(&harness, EventKind::DataThresholdReached), 1);
    assert_eq!(history_count(&harness, EventKind::StreamingStarted), 1);

    harness.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_own_events_are_not_redispatched() {
    let harness = setup(test_config(2)).await;

    load(&harness, &["AAPL", "MSFT"]).await;
    wait_for_snapshot(&harness, |s| s.is_streaming).await;
    let before = harness.pipeline.state.emitter.dispatcher().history_len();

    let summary = harness.pipeline.state.listener.poll_once().await;
    assert!(summary.received > 0);
    assert_eq!(summary.echoes, summary.received);
    assert_eq!(summary.dispatched, 0);
    assert_eq!(
        harness.pipeline.state.emitter.dispatcher().history_len(),
        before
    );
    assert_eq!(harness.bus.in_flight("pipeline-events-driver"), 0);

    harness.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_with_slow_sink_quiesces_within_two_intervals() {
    let sink = RecordingSink {
        delay: Some(TICK_INTERVAL * 3 / 2),
        ..RecordingSink::default()
    };
    let harness = setup_with_sink(test_config(3), sink).await;
    let controller = harness.pipeline.state.controller.clone();

    load(&harness, &["AAPL", "MSFT", "GOOG"]).await;
    wait_for_snapshot(&harness, |s| s.is_streaming).await;
    wait_for_ticks(&harness, 4).await;

    let started = tokio::time::Instant::now();
    let stopped = controller.stop().await.unwrap();
    assert!(started.elapsed() <= TICK_INTERVAL * 2);
    assert!(!stopped.is_streaming);
    assert_eq!(controller.streamer_stats().active_loops, 0);

    let after_stop = harness.sink.count();
    tokio::time::sleep(TICK_INTERVAL * 5).await;
    assert_eq!(harness.sink.count(), after_stop);

    harness.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_repeated_start_stop_never_overlaps_loops() {
    let harness = setup(test_config(2)).await;
    let controller = harness.pipeline.state.controller.clone();

    load(&harness, &["AAPL", "MSFT"]).await;
    wait_for_snapshot(&harness, |s| s.is_streaming).await;

    for _ in 0..5 {
        controller.stop().await.unwrap();
        assert_eq!(controller.streamer_stats().active_loops, 0);

        let (first, second) = tokio::join!(controller.start(), controller.start());
        assert!(first.unwrap().is_streaming);
        assert!(second.unwrap().is_streaming);
        assert!(controller.streamer_stats().active_loops <= 1);

        tokio::time::sleep(TICK_INTERVAL).await;
        assert!(controller.streamer_stats().active_loops <= 1);
    }

    assert_eq!(controller.streamer_stats().active_loops, 1);
    // The threshold start plus one per cycle.
    assert_eq!(history_count(&harness, EventKind::StreamingStarted), 6);
    assert_eq!(history_count(&harness, EventKind::StreamingStopped), 5);

    harness.pipeline.shutdown(Duration::from_secs(2)).await;
}
