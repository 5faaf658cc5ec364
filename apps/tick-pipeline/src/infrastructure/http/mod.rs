//! HTTP API
//!
//! REST endpoints for the receiver, the streaming controller, ingestion
//! announcements and event introspection, plus a WebSocket relay of
//! received ticks. Health and metrics routes come from
//! [`crate::infrastructure::health`].

mod error;
mod state;
mod ws;

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::ApiError;
pub use state::AppState;

use crate::application::services::{
    BatchReport, CompanyInfoReport, ControllerSnapshot, DispatcherStats, IngestionReceipt,
    StockLoadedReport, StreamerStats,
};
use crate::domain::events::{Event, EventKind, parse_timestamp};
use crate::domain::tick::Tick;
use crate::infrastructure::buffer::{BufferStatus, TickFilter, TickStatistics};
use crate::infrastructure::bus::{ListenerStatus, PublisherStats};
use crate::infrastructure::health;

/// Default `limit` for tick queries.
pub const DEFAULT_TICK_LIMIT: usize = 100;

/// Default `limit` for one symbol's ticks on the short route.
pub const DEFAULT_SYMBOL_TICK_LIMIT: usize = 50;

/// Default `limit` for recent ticks.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Default `limit` for event history.
pub const DEFAULT_EVENT_LIMIT: usize = 100;

/// Largest accepted `limit`.
pub const MAX_QUERY_LIMIT: usize = 10_000;

/// Create the Axum router with all endpoints.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .route("/ticks", post(receive_tick).get(tick_listing))
        .route("/ticks/{symbol}", get(symbol_tick_listing))
        .route("/api/v1/stream/ticks", post(receive_tick).get(list_ticks))
        .route("/api/v1/stream/ticks/{symbol}/latest", get(latest_tick))
        .route("/api/v1/stream/ticks/{symbol}/statistics", get(tick_statistics))
        .route("/api/v1/stream/recent", get(recent_ticks))
        .route("/api/v1/stream/symbols", get(active_symbols))
        .route("/api/v1/stream/status", get(stream_status))
        .route("/api/v1/stream/start", post(start_streaming))
        .route("/api/v1/stream/stop", post(stop_streaming))
        .route("/api/v1/stream/ws", get(ws::ws_handler))
        .route("/api/v1/ingest/stocks", post(ingest_stock))
        .route("/api/v1/ingest/companies", post(ingest_company))
        .route("/api/v1/ingest/batches", post(ingest_batch))
        .route("/api/v1/events", get(list_events))
        .route("/api/v1/events/stats", get(event_stats))
        .route("/api/v1/transport/status", get(transport_status))
        .with_state(state)
}

/// Serve the router on `port` until `cancel` fires.
///
/// # Errors
///
/// Returns `HttpServerError` if binding fails or the server stops with an
/// error.
pub async fn serve(
    port: u16,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), HttpServerError> {
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| HttpServerError::BindFailed(port, e.to_string()))?;

    tracing::info!(port, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind HTTP server to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server failed during operation.
    #[error("HTTP server failed: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Receiver
// =============================================================================

/// Receive one tick.
async fn receive_tick(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<(StatusCode, Json<Tick>), ApiError> {
    let tick = state.ingestor.ingest(raw)?;
    Ok((StatusCode::CREATED, Json(tick)))
}

/// Tick query parameters.
#[derive(Debug, Deserialize)]
pub struct TickQuery {
    /// Restrict to one symbol.
    pub symbol: Option<String>,
    /// Maximum ticks returned.
    pub limit: Option<usize>,
    /// Earliest tick time, inclusive. RFC 3339 or offset-less ISO (UTC).
    pub start_time: Option<String>,
    /// Latest tick time, inclusive.
    pub end_time: Option<String>,
}

impl TickQuery {
    fn filter(&self) -> Result<TickFilter, ApiError> {
        Ok(TickFilter {
            symbol: self
                .symbol
                .as_deref()
                .map(normalize_symbol)
                .filter(|s| !s.is_empty()),
            start_time: parse_bound("start_time", self.start_time.as_deref())?,
            end_time: parse_bound("end_time", self.end_time.as_deref())?,
        })
    }
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => parse_timestamp(value)
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("invalid {name}: {value}"))),
        None => Ok(None),
    }
}

/// Tick listing wrapped with its count, as served on `/ticks`.
#[derive(Debug, Serialize)]
pub struct TickListing {
    /// Symbol filter, if any.
    pub symbol: Option<String>,
    /// Matching ticks, oldest first.
    pub ticks: Vec<Tick>,
    /// Number of ticks returned.
    pub count: usize,
    /// Time of the query.
    pub timestamp: DateTime<Utc>,
}

impl TickListing {
    fn new(symbol: Option<String>, ticks: Vec<Tick>) -> Self {
        Self {
            symbol,
            count: ticks.len(),
            ticks,
            timestamp: Utc::now(),
        }
    }
}

/// Limit query parameter.
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    /// Maximum items returned.
    pub limit: Option<usize>,
}

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).min(MAX_QUERY_LIMIT)
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

async fn list_ticks(
    State(state): State<AppState>,
    Query(query): Query<TickQuery>,
) -> Result<Json<Vec<Tick>>, ApiError> {
    let filter = query.filter()?;
    let limit = clamp_limit(query.limit, DEFAULT_TICK_LIMIT);
    Ok(Json(state.buffer.ticks(&filter, limit)))
}

async fn tick_listing(
    State(state): State<AppState>,
    Query(query): Query<TickQuery>,
) -> Result<Json<TickListing>, ApiError> {
    let filter = query.filter()?;
    let limit = clamp_limit(query.limit, DEFAULT_TICK_LIMIT);
    let ticks = state.buffer.ticks(&filter, limit);
    Ok(Json(TickListing::new(filter.symbol, ticks)))
}

async fn symbol_tick_listing(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<TickQuery>,
) -> Result<Json<TickListing>, ApiError> {
    let filter = TickFilter {
        symbol: Some(normalize_symbol(&symbol)),
        ..query.filter()?
    };
    let limit = clamp_limit(query.limit, DEFAULT_SYMBOL_TICK_LIMIT);
    let ticks = state.buffer.ticks(&filter, limit);
    Ok(Json(TickListing::new(filter.symbol, ticks)))
}

async fn latest_tick(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Tick>, ApiError> {
    let symbol = normalize_symbol(&symbol);
    state
        .buffer
        .latest(&symbol)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no ticks found for {symbol}")))
}

async fn tick_statistics(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<TickStatistics>, ApiError> {
    let symbol = normalize_symbol(&symbol);
    state
        .buffer
        .statistics(&symbol)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no ticks found for {symbol}")))
}

async fn recent_ticks(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<Tick>> {
    Json(state.buffer.recent(clamp_limit(query.limit, DEFAULT_RECENT_LIMIT)))
}

/// Active symbol listing.
#[derive(Debug, Serialize)]
pub struct SymbolsResponse {
    /// Symbols with buffered ticks.
    pub symbols: Vec<String>,
    /// Number of symbols.
    pub count: usize,
}

async fn active_symbols(State(state): State<AppState>) -> Json<SymbolsResponse> {
    let symbols = state.buffer.symbols();
    Json(SymbolsResponse {
        count: symbols.len(),
        symbols,
    })
}

// =============================================================================
// Streaming Controller
// =============================================================================

/// Combined streaming status.
#[derive(Debug, Serialize)]
pub struct StreamStatus {
    /// Controller state.
    pub controller: ControllerSnapshot,
    /// Tick loop counters.
    pub streamer: StreamerStats,
    /// Receive buffer occupancy.
    pub buffer: BufferStatus,
    /// Connected WebSocket clients.
    pub websocket_clients: usize,
}

async fn stream_status(State(state): State<AppState>) -> Json<StreamStatus> {
    Json(StreamStatus {
        controller: state.controller.snapshot(),
        streamer: state.controller.streamer_stats(),
        buffer: state.buffer.status(),
        websocket_clients: state.broadcast.receiver_count(),
    })
}

async fn start_streaming(
    State(state): State<AppState>,
) -> Result<Json<ControllerSnapshot>, ApiError> {
    tracing::info!("Manual streaming start requested");
    Ok(Json(state.controller.start().await?))
}

async fn stop_streaming(
    State(state): State<AppState>,
) -> Result<Json<ControllerSnapshot>, ApiError> {
    tracing::info!("Manual streaming stop requested");
    Ok(Json(state.controller.stop().await?))
}

// =============================================================================
// Ingestion
// =============================================================================

async fn ingest_stock(
    State(state): State<AppState>,
    Json(report): Json<StockLoadedReport>,
) -> Result<(StatusCode, Json<IngestionReceipt>), ApiError> {
    let receipt = state.reporter.stock_loaded(report).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn ingest_company(
    State(state): State<AppState>,
    Json(report): Json<CompanyInfoReport>,
) -> Result<(StatusCode, Json<IngestionReceipt>), ApiError> {
    let receipt = state.reporter.company_info_updated(report).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn ingest_batch(
    State(state): State<AppState>,
    Json(report): Json<BatchReport>,
) -> Result<(StatusCode, Json<IngestionReceipt>), ApiError> {
    let receipt = state.reporter.batch_completed(report).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

// =============================================================================
// Events and Transport
// =============================================================================

/// Event history query parameters.
#[derive(Debug, Deserialize)]
pub struct EventQuery {
    /// Restrict to one event kind (wire name).
    pub kind: Option<String>,
    /// Maximum events returned.
    pub limit: Option<usize>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let kind = match query.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(name) => Some(
            EventKind::parse(name)
                .ok_or_else(|| ApiError::bad_request(format!("unknown event kind: {name}")))?,
        ),
        None => None,
    };
    let limit = clamp_limit(query.limit, DEFAULT_EVENT_LIMIT);
    Ok(Json(state.emitter.dispatcher().history(kind, limit)))
}

async fn event_stats(State(state): State<AppState>) -> Json<DispatcherStats> {
    Json(state.emitter.dispatcher().stats())
}

/// Transport state.
#[derive(Debug, Serialize)]
pub struct TransportStatus {
    /// Publish side counters.
    pub publisher: PublisherStats,
    /// Subscribe side counters.
    pub listener: ListenerStatus,
    /// Own event ids remembered for echo suppression.
    pub remembered_event_ids: usize,
}

async fn transport_status(State(state): State<AppState>) -> Json<TransportStatus> {
    Json(TransportStatus {
        publisher: state.publisher.stats(),
        listener: state.listener.status(),
        remembered_event_ids: state.emitter.echoes().len(),
    })
}
