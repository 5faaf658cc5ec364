//! Tick Pipeline Binary
//!
//! Starts the event-coordinated tick streaming pipeline.
//!
//! # Environment Variables
//!
//! ## Transport
//! - `EVENT_TOPIC`: Bus topic events are published to (default: pipeline-events)
//! - `EVENT_QUEUE`: Bus queue events are received from (default: pipeline-events-driver)
//! - `EVENT_BUS_URL`: Notification gateway; unset selects the in-memory bus
//!
//! ## Streaming
//! - `STOCK_THRESHOLD`: Ready symbols required to stream (default: 30)
//! - `TICK_INTERVAL_MS`: Sleep between tick sweeps (default: 1000)
//! - `STREAM_RECEIVER_URL`: Receiver ticks are posted to (default: <http://localhost:8002>)
//! - `READY_SYMBOLS_PATH`: Ready-set checkpoint; empty keeps it in memory
//!
//! ## Server
//! - `PIPELINE_HTTP_PORT`: REST/WebSocket/health port (default: 8002)
//!
//! ## Telemetry
//! - `OTEL_*`, `LOG_FORMAT`, `RUST_LOG`: see `observability::tracing`
//!
//! A `.env` file in the working directory or any ancestor is loaded first.

use std::path::PathBuf;
use std::time::Duration;

use tick_pipeline::{Pipeline, PipelineAdapters, PipelineConfig, init_metrics, serve};
use tokio_util::sync::CancellationToken;

/// Time allowed for the tick loop, listener and HTTP server to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = load_dotenv();
    let telemetry = tick_pipeline::init_telemetry();
    let _metrics = init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dotenv = ?dotenv,
        span_export = telemetry.is_exporting(),
        "Tick pipeline starting"
    );

    let config = PipelineConfig::from_env()?;
    log_config(&config);

    let shutdown = CancellationToken::new();
    let pipeline = Pipeline::assemble(&config, PipelineAdapters::from_config(&config)?, &shutdown).await;

    if pipeline.state.publisher.is_configured() {
        pipeline.state.publisher.test_connection().await;
    }
    if !pipeline.start_listener() {
        tracing::info!("No event queue configured, peer events will not be received");
    }

    let http_task = tokio::spawn({
        let state = pipeline.state.clone();
        let shutdown = shutdown.clone();
        let port = config.server.http_port;
        async move {
            if let Err(e) = serve(port, state, shutdown.clone()).await {
                tracing::error!(port, error = %e, "HTTP server failed, shutting down");
                shutdown.cancel();
            }
        }
    });

    let reason = tokio::select! {
        reason = termination_signal() => reason,
        () = shutdown.cancelled() => "internal failure",
    };
    tracing::info!(
        reason,
        grace_secs = SHUTDOWN_GRACE.as_secs(),
        "Stopping tick pipeline"
    );
    shutdown.cancel();

    pipeline.shutdown(SHUTDOWN_GRACE).await;
    if tokio::time::timeout(SHUTDOWN_GRACE, http_task).await.is_err() {
        tracing::warn!("HTTP server did not drain in time");
    }

    tracing::info!("Tick pipeline stopped");
    drop(telemetry);
    Ok(())
}

/// Load the first `.env` found walking up from the working directory.
fn load_dotenv() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    cwd.ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())
        .and_then(|path| dotenvy::from_path(&path).ok().map(|()| path))
}

fn log_config(config: &PipelineConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        threshold = config.streaming.threshold,
        tick_interval_ms = u64::try_from(config.streaming.tick_interval.as_millis()).unwrap_or(u64::MAX),
        topic = ?config.transport.topic,
        queue = ?config.transport.queue,
        "Configuration loaded"
    );
    tracing::debug!(
        bus_url = ?config.transport.bus_url,
        receiver_url = %config.streaming.receiver_url,
        symbol_source_url = ?config.source.symbol_source_url,
        ready_symbols_path = ?config.storage.ready_symbols_path,
        seeds = config.source.seed_symbols.len(),
        "Pipeline endpoints"
    );
}

/// Resolve with the name of the first termination signal received.
async fn termination_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            },
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl+C"
    }
}
