//! Tick Streaming Loop
//!
//! One sweep per iteration: a tick for every ticker, each forwarded to the
//! [`TickSink`] without retry, then a sleep of the tick interval. Sink
//! failures are counted and logged; the loop never returns an error.
//!
//! Cancellation is checked before every ticker, so a stop waits for at
//! most the one in-flight send. A sink that never returns is bounded by
//! the handle's grace period, after which the task is aborted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::monitor::FailureWindow;
use crate::application::ports::TickSink;
use crate::domain::tick::{TickGenerator, Ticker};
use crate::observability;

/// Default sleep between sweeps.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1_000);

/// Streaming loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamerStats {
    /// Loops currently running (never more than one under the controller).
    pub active_loops: usize,
    /// Ticks produced since startup.
    pub ticks_generated: u64,
    /// Ticks accepted by the sink since startup.
    pub ticks_sent: u64,
    /// Ticks the sink rejected since startup.
    pub send_failures: u64,
    /// Ticks the sink rejected inside the failure window.
    pub recent_send_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    active_loops: AtomicUsize,
    ticks_generated: AtomicU64,
    ticks_sent: AtomicU64,
    send_failures: AtomicU64,
    recent_failures: FailureWindow,
}

/// Handle to a running streaming loop.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    symbols: usize,
    ticks: Arc<AtomicU64>,
}

impl StreamHandle {
    /// Number of tickers being streamed.
    #[must_use]
    pub const fn symbols(&self) -> usize {
        self.symbols
    }

    /// Ticks this loop has generated so far.
    #[must_use]
    pub fn ticks_generated(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Whether the loop task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the loop to exit before its next ticker and wait for it.
    ///
    /// If the loop has not exited after `grace`, it is aborted. Either way
    /// the loop is gone when this returns. Returns the ticks it generated.
    pub async fn shutdown(mut self, grace: Duration) -> u64 {
        self.cancel.cancel();
        if tokio::time::timeout(grace, &mut self.join).await.is_err() {
            tracing::warn!(
                grace_ms = grace.as_millis(),
                "Tick loop did not stop within grace period, aborting"
            );
            self.join.abort();
            let _ = self.join.await;
        }
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Spawns and accounts for tick streaming loops.
#[derive(Clone)]
pub struct TickStreamer {
    sink: Arc<dyn TickSink>,
    generator: TickGenerator,
    tick_interval: Duration,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for TickStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickStreamer")
            .field("generator", &self.generator)
            .field("tick_interval", &self.tick_interval)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl TickStreamer {
    /// Create a streamer.
    #[must_use]
    pub fn new(sink: Arc<dyn TickSink>, generator: TickGenerator, tick_interval: Duration) -> Self {
        Self {
            sink,
            generator,
            tick_interval,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Sleep between sweeps.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Number of loops currently running.
    #[must_use]
    pub fn active_loops(&self) -> usize {
        self.counters.active_loops.load(Ordering::SeqCst)
    }

    /// Snapshot of the loop counters.
    #[must_use]
    pub fn stats(&self) -> StreamerStats {
        StreamerStats {
            active_loops: self.active_loops(),
            ticks_generated: self.counters.ticks_generated.load(Ordering::Relaxed),
            ticks_sent: self.counters.ticks_sent.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            recent_send_failures: self.counters.recent_failures.count(),
        }
    }

    /// Spawn a loop over `tickers`, cancelled with `parent` or the handle.
    #[must_use]
    pub fn spawn(&self, tickers: Vec<Ticker>, parent: &CancellationToken) -> StreamHandle {
        let cancel = parent.child_token();
        let symbols = tickers.len();
        // Count the loop before the task is scheduled so callers never observe zero.
        let guard = ActiveLoop::enter(Arc::clone(&self.counters));
        let ticks = Arc::new(AtomicU64::new(0));
        let streamer = self.clone();
        let loop_cancel = cancel.clone();
        let loop_ticks = Arc::clone(&ticks);
        let join = tokio::spawn(async move {
            let _guard = guard;
            streamer.run(tickers, loop_cancel, loop_ticks).await;
        });
        StreamHandle {
            cancel,
            join,
            symbols,
            ticks,
        }
    }

    async fn run(&self, tickers: Vec<Ticker>, cancel: CancellationToken, ticks: Arc<AtomicU64>) {
        tracing::info!(
            symbols = tickers.len(),
            interval_ms = self.tick_interval.as_millis(),
            "Tick loop started"
        );

        let mut tick_number: u64 = 0;
        'sweeps: loop {
            for ticker in &tickers {
                if cancel.is_cancelled() {
                    break 'sweeps;
                }
                tick_number += 1;
                ticks.store(tick_number, Ordering::Relaxed);
                self.emit_tick(ticker, tick_number).await;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.tick_interval) => {}
            }
        }

        tracing::info!(ticks = tick_number, "Tick loop stopped");
    }

    async fn emit_tick(&self, ticker: &Ticker, tick_number: u64) {
        let tick = self.generator.generate(ticker, tick_number);
        self.counters.ticks_generated.fetch_add(1, Ordering::Relaxed);
        observability::record_tick_generated();

        let started = Instant::now();
        match self.sink.send(&tick).await {
            Ok(()) => {
                self.counters.ticks_sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(symbol = %tick.symbol, price = tick.price, "Tick sent");
            }
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                self.counters.recent_failures.record();
                observability::record_tick_send_failure();
                tracing::warn!(symbol = %tick.symbol, error = %e, "Failed to forward tick");
            }
        }
        observability::record_tick_send_duration(started.elapsed());
    }
}

struct ActiveLoop(Arc<Counters>);

impl ActiveLoop {
    fn enter(counters: Arc<Counters>) -> Self {
        counters.active_loops.fetch_add(1, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ActiveLoop {
    fn drop(&mut self) {
        self.0.active_loops.fetch_sub(1, Ordering::SeqCst);
    }
}
