//! Pipeline Health Monitor
//!
//! Counts reported errors by severity and folds them, together with
//! transport and tick delivery failures over a trailing window, into a
//! single [`HealthStatus`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use super::dispatcher::{EventDispatcher, SubscriptionId};
use crate::domain::events::{EventKind, EventPayload, Severity};

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some systems degraded but functional.
    Degraded,
    /// Critical systems unavailable.
    Unhealthy,
}

/// Error counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorCounts {
    /// Low severity.
    pub low: u64,
    /// Medium severity.
    pub medium: u64,
    /// High severity.
    pub high: u64,
    /// Critical severity.
    pub critical: u64,
}

/// Live signals the status is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthInputs {
    /// Whether the streaming controller task is alive.
    pub controller_running: bool,
    /// Whether a transport topic is configured.
    pub transport_configured: bool,
    /// Transport publish failures inside [`FAILURE_WINDOW`].
    pub recent_publish_failures: u64,
    /// Tick send failures inside [`FAILURE_WINDOW`].
    pub recent_tick_send_failures: u64,
}

/// Trailing window delivery failures are judged over.
pub const FAILURE_WINDOW: Duration = Duration::from_secs(300);

/// Timestamps kept per window; older entries are dropped first.
const FAILURE_WINDOW_CAPACITY: usize = 10_000;

/// Failure timestamps inside a trailing window.
#[derive(Debug)]
pub struct FailureWindow {
    window: Duration,
    failures: Mutex<VecDeque<Instant>>,
}

impl Default for FailureWindow {
    fn default() -> Self {
        Self::new(FAILURE_WINDOW)
    }
}

impl FailureWindow {
    /// Create an empty window of length `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Note one failure now.
    pub fn record(&self) {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        self.prune(&mut failures, now);
        if failures.len() == FAILURE_WINDOW_CAPACITY {
            failures.pop_front();
        }
        failures.push_back(now);
    }

    /// Failures recorded within the window.
    #[must_use]
    pub fn count(&self) -> u64 {
        let mut failures = self.failures.lock();
        self.prune(&mut failures, Instant::now());
        failures.len() as u64
    }

    fn prune(&self, failures: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = failures.front() {
            if now.duration_since(*oldest) < self.window {
                break;
            }
            failures.pop_front();
        }
    }
}

/// Aggregates error events.
#[derive(Debug, Default)]
pub struct PipelineMonitor {
    low: AtomicU64,
    medium: AtomicU64,
    high: AtomicU64,
    critical: AtomicU64,
}

impl PipelineMonitor {
    /// Create a monitor with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every `error_occurred` event seen on `dispatcher`.
    pub fn attach(self: &Arc<Self>, dispatcher: &EventDispatcher) -> SubscriptionId {
        let monitor = Arc::clone(self);
        dispatcher.subscribe(EventKind::ErrorOccurred, move |event| {
            if let EventPayload::Error(report) = event.payload() {
                monitor.record_error(report.severity);
            }
            Ok(())
        })
    }

    /// Count one error.
    pub fn record_error(&self, severity: Severity) {
        let counter = match severity {
            Severity::Low => &self.low,
            Severity::Medium => &self.medium,
            Severity::High => &self.high,
            Severity::Critical => &self.critical,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Errors counted so far.
    #[must_use]
    pub fn errors(&self) -> ErrorCounts {
        ErrorCounts {
            low: self.low.load(Ordering::Relaxed),
            medium: self.medium.load(Ordering::Relaxed),
            high: self.high.load(Ordering::Relaxed),
            critical: self.critical.load(Ordering::Relaxed),
        }
    }

    /// Derive the status from counted errors and `inputs`.
    #[must_use]
    pub fn status(&self, inputs: HealthInputs) -> HealthStatus {
        determine_health_status(self.errors(), inputs)
    }
}

/// Status rules: critical errors or a dead controller are unhealthy; high
/// severity errors, recent delivery failures or a missing transport degrade.
#[must_use]
pub const fn determine_health_status(errors: ErrorCounts, inputs: HealthInputs) -> HealthStatus {
    if errors.critical > 0 || !inputs.controller_running {
        return HealthStatus::Unhealthy;
    }
    if errors.high > 0
        || inputs.recent_publish_failures > 0
        || inputs.recent_tick_send_failures > 0
        || !inputs.transport_configured
    {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}
