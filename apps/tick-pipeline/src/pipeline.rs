//! Pipeline Assembly
//!
//! Wires adapters, services and the HTTP state from a [`PipelineConfig`].
//! The binary and the integration tests build the pipeline the same way;
//! only the [`PipelineAdapters`] differ.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    BusError, EventPublisher, NotificationBus, SinkError, SourceError, StockRegistry,
    SymbolSource, ThresholdStore, TickRelay, TickSink, TickStore,
};
use crate::application::services::{
    ControllerConfig, ControllerDeps, EchoFilter, EventDispatcher, EventEmitter,
    IngestionReporter, PipelineMonitor, StreamingController, TickIngestor, TickStreamer,
    record_peer_loads, register_logging_handlers,
};
use crate::domain::tick::TickGenerator;
use crate::infrastructure::broadcast::{DEFAULT_BROADCAST_CAPACITY, TickBroadcast};
use crate::infrastructure::buffer::TickBuffer;
use crate::infrastructure::bus::{
    BusEventPublisher, EventListener, HttpBus, InMemoryBus, ListenerConfig,
};
use crate::infrastructure::catalog::{HttpSymbolSource, StockCatalog};
use crate::infrastructure::config::PipelineConfig;
use crate::infrastructure::http::AppState;
use crate::infrastructure::sink::HttpTickSink;
use crate::infrastructure::store::{FileThresholdStore, MemoryThresholdStore};

/// Timeout for symbol source and bus gateway requests.
const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Adapter construction errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Bus gateway client could not be built.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Tick sink client could not be built.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Symbol source client could not be built.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Implementations behind the driven ports.
pub struct PipelineAdapters {
    /// Event transport.
    pub bus: Arc<dyn NotificationBus>,
    /// Tick delivery.
    pub sink: Arc<dyn TickSink>,
    /// Authoritative symbol source. `None` uses the local catalog.
    pub symbol_source: Option<Arc<dyn SymbolSource>>,
    /// Ready-symbol checkpoint.
    pub store: Arc<dyn ThresholdStore>,
}

impl std::fmt::Debug for PipelineAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineAdapters")
            .field("remote_symbol_source", &self.symbol_source.is_some())
            .finish_non_exhaustive()
    }
}

impl PipelineAdapters {
    /// Adapters selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if an HTTP client cannot be built.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let bus: Arc<dyn NotificationBus> = match &config.transport.bus_url {
            Some(url) => Arc::new(HttpBus::new(url, REMOTE_TIMEOUT)?),
            None => Arc::new(in_memory_bus(config)),
        };

        let sink = Arc::new(HttpTickSink::new(
            &config.streaming.receiver_url,
            config.streaming.send_timeout,
        )?);

        let symbol_source: Option<Arc<dyn SymbolSource>> = match &config.source.symbol_source_url {
            Some(url) => Some(Arc::new(HttpSymbolSource::new(url, REMOTE_TIMEOUT)?)),
            None => None,
        };

        let store: Arc<dyn ThresholdStore> = match &config.storage.ready_symbols_path {
            Some(path) => Arc::new(FileThresholdStore::new(path.clone())),
            None => Arc::new(MemoryThresholdStore::new()),
        };

        Ok(Self {
            bus,
            sink,
            symbol_source,
            store,
        })
    }
}

/// In-memory bus with the configured topic bound to the configured queue.
#[must_use]
pub fn in_memory_bus(config: &PipelineConfig) -> InMemoryBus {
    let bus = InMemoryBus::new();
    match (&config.transport.topic, &config.transport.queue) {
        (Some(topic), Some(queue)) => bus.bind(topic, queue),
        (Some(topic), None) => bus.create_topic(topic),
        _ => {}
    }
    bus
}

/// Running pipeline.
pub struct Pipeline {
    /// Shared HTTP state.
    pub state: AppState,
    /// Local symbol catalog.
    pub catalog: Arc<StockCatalog>,
    controller_task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build every service and spawn the streaming controller.
    ///
    /// The event listener is created but not started; call
    /// [`Self::start_listener`].
    pub async fn assemble(
        config: &PipelineConfig,
        adapters: PipelineAdapters,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();

        let dispatcher = Arc::new(EventDispatcher::new(config.transport.history_capacity));
        register_logging_handlers(&dispatcher);

        let publisher = Arc::new(BusEventPublisher::new(
            Arc::clone(&adapters.bus),
            config.transport.topic.clone(),
        ));
        let echoes = Arc::new(EchoFilter::default());
        let emitter = EventEmitter::new(
            Arc::clone(&dispatcher),
            Arc::clone(&publisher) as Arc<dyn EventPublisher>,
            Arc::clone(&echoes),
        );

        let catalog = Arc::new(StockCatalog::seeded(&config.source.seed_symbols));
        record_peer_loads(&dispatcher, Arc::clone(&catalog) as Arc<dyn StockRegistry>);
        let symbol_source = adapters
            .symbol_source
            .unwrap_or_else(|| Arc::clone(&catalog) as Arc<dyn SymbolSource>);

        let streamer = TickStreamer::new(
            adapters.sink,
            TickGenerator::new(config.streaming.jitter),
            config.streaming.tick_interval,
        );
        let controller_config = ControllerConfig {
            threshold: config.streaming.threshold,
            poll_interval: config.streaming.threshold_poll_interval,
            ..ControllerConfig::default()
        };
        let (controller, controller_task) = StreamingController::spawn(
            controller_config,
            ControllerDeps {
                symbol_source,
                store: adapters.store,
                streamer,
                emitter: emitter.clone(),
            },
            &cancel,
        )
        .await;
        controller.attach(&dispatcher);

        let monitor = Arc::new(PipelineMonitor::new());
        monitor.attach(&dispatcher);

        let buffer = Arc::new(TickBuffer::new(
            config.storage.tick_retention,
            config.storage.tick_buffer_capacity,
        ));
        let broadcast = Arc::new(TickBroadcast::new(DEFAULT_BROADCAST_CAPACITY));
        let ingestor = TickIngestor::new(
            Arc::clone(&buffer) as Arc<dyn TickStore>,
            Arc::clone(&broadcast) as Arc<dyn TickRelay>,
            emitter.clone(),
        );
        let reporter = IngestionReporter::new(
            Arc::clone(&catalog) as Arc<dyn StockRegistry>,
            emitter.clone(),
        );

        let listener = Arc::new(EventListener::new(
            adapters.bus,
            Arc::clone(&dispatcher),
            echoes,
            ListenerConfig {
                queue: config.transport.queue.clone(),
                poll_interval: config.transport.poll_interval,
                batch_size: config.transport.poll_batch,
                stop_timeout: config.transport.listener_stop_timeout,
            },
        ));

        tracing::info!(
            threshold = config.streaming.threshold,
            seeded = catalog.len(),
            topic = ?config.transport.topic,
            queue = ?config.transport.queue,
            "Pipeline assembled"
        );

        let state = AppState {
            controller,
            emitter,
            ingestor,
            reporter,
            buffer,
            broadcast,
            publisher,
            listener,
            monitor,
            shutdown: cancel.clone(),
            started_at: std::time::Instant::now(),
        };

        Self {
            state,
            catalog,
            controller_task,
            cancel,
        }
    }

    /// Start polling the event queue. Returns whether a poll task started.
    pub fn start_listener(&self) -> bool {
        self.state.listener.start(&self.cancel)
    }

    /// Token cancelled by [`Self::shutdown`].
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop the listener and the controller, waiting at most `grace` for
    /// the controller to wind down.
    pub async fn shutdown(self, grace: Duration) {
        self.state.listener.stop().await;
        self.cancel.cancel();

        let mut task = self.controller_task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Streaming controller did not stop in time, aborting"
            );
            task.abort();
        }
        tracing::info!("Pipeline stopped");
    }
}
