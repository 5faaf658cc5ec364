use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::application::services::{
    EventEmitter, IngestionReporter, PipelineMonitor, StreamingController, TickIngestor,
};
use crate::infrastructure::broadcast::SharedTickBroadcast;
use crate::infrastructure::buffer::TickBuffer;
use crate::infrastructure::bus::{BusEventPublisher, EventListener};

/// Shared state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Threshold-gated streaming controller.
    pub controller: StreamingController,
    /// Local dispatch plus transport relay.
    pub emitter: EventEmitter,
    /// Receiver for posted ticks.
    pub ingestor: TickIngestor,
    /// Loader announcements.
    pub reporter: IngestionReporter,
    /// Received tick store.
    pub buffer: Arc<TickBuffer>,
    /// Live tick relay for WebSocket clients.
    pub broadcast: SharedTickBroadcast,
    /// Publish side of the event transport.
    pub publisher: Arc<BusEventPublisher>,
    /// Subscribe side of the event transport.
    pub listener: Arc<EventListener>,
    /// Error and delivery health.
    pub monitor: Arc<PipelineMonitor>,
    /// Closes WebSocket relays on shutdown.
    pub shutdown: CancellationToken,
    /// Server start time.
    pub started_at: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("controller", &self.controller)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}
