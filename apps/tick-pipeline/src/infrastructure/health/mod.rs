//! Health Check and Metrics Endpoints
//!
//! Health, liveness, readiness and Prometheus routes, merged into the main
//! HTTP router.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health report (503 when unhealthy)
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (controller task alive)
//! - `GET /metrics` - Prometheus metrics in text format

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::monitor::ErrorCounts;
use crate::application::services::{HealthInputs, HealthStatus};
use crate::infrastructure::http::AppState;
use crate::observability::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Streaming controller state.
    pub controller: ControllerHealth,
    /// Event transport state.
    pub transport: TransportHealth,
    /// Tick flow counters.
    pub ticks: TickHealth,
    /// Reported errors by severity.
    pub errors: ErrorCounts,
}

/// Streaming controller state.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerHealth {
    /// Whether the controller task is alive.
    pub running: bool,
    /// Whether ticks are being generated.
    pub streaming: bool,
    /// Symbols counted as ready.
    pub ready_count: usize,
    /// Ready symbols required to stream.
    pub required_threshold: usize,
}

/// Event transport state.
#[derive(Debug, Clone, Serialize)]
pub struct TransportHealth {
    /// Whether a publish topic is configured.
    pub configured: bool,
    /// Whether the queue listener is polling.
    pub listening: bool,
    /// Events published.
    pub published: u64,
    /// Events that failed to publish.
    pub publish_failures: u64,
    /// Publish failures inside the failure window.
    pub recent_publish_failures: u64,
}

/// Tick flow counters.
#[derive(Debug, Clone, Serialize)]
pub struct TickHealth {
    /// Ticks generated by the streaming loop.
    pub generated: u64,
    /// Ticks the receiver accepted from the loop.
    pub sent: u64,
    /// Ticks the loop failed to deliver.
    pub send_failures: u64,
    /// Delivery failures inside the failure window.
    pub recent_send_failures: u64,
    /// Ticks held in the receive buffer.
    pub buffered: usize,
    /// Connected WebSocket clients.
    pub websocket_clients: usize,
}

// =============================================================================
// Routes
// =============================================================================

/// Health, probe and metrics routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.controller.is_running() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

/// Assemble the health report from live state.
#[must_use]
pub fn build_health_response(state: &AppState) -> HealthResponse {
    let snapshot = state.controller.snapshot();
    let streamer = state.controller.streamer_stats();
    let publisher = state.publisher.stats();

    let inputs = HealthInputs {
        controller_running: state.controller.is_running(),
        transport_configured: state.publisher.is_configured(),
        recent_publish_failures: publisher.recent_failures,
        recent_tick_send_failures: streamer.recent_send_failures,
    };

    HealthResponse {
        status: state.monitor.status(inputs),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        controller: ControllerHealth {
            running: inputs.controller_running,
            streaming: snapshot.is_streaming,
            ready_count: snapshot.ready_count,
            required_threshold: snapshot.required_threshold,
        },
        transport: TransportHealth {
            configured: inputs.transport_configured,
            listening: state.listener.is_listening(),
            published: publisher.published,
            publish_failures: publisher.failed,
            recent_publish_failures: inputs.recent_publish_failures,
        },
        ticks: TickHealth {
            generated: streamer.ticks_generated,
            sent: streamer.ticks_sent,
            send_failures: streamer.send_failures,
            recent_send_failures: inputs.recent_tick_send_failures,
            buffered: state.buffer.len(),
            websocket_clients: state.broadcast.receiver_count(),
        },
        errors: state.monitor.errors(),
    }
}
