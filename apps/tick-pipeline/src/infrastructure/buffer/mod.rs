//! Received Tick Buffer
//!
//! Bounded, time-windowed store of ticks accepted by the receiver. Ticks
//! are kept in arrival order; the oldest are evicted once the buffer is
//! over capacity or older than the retention window.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::application::ports::TickStore;
use crate::domain::tick::Tick;

/// Default retention window (24 hours).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(86_400);

/// Default maximum number of buffered ticks.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Ticks summed into the statistics volume.
pub const VOLUME_WINDOW: usize = 24;

/// Per-symbol summary over the retained ticks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickStatistics {
    /// Ticker symbol.
    pub symbol: String,
    /// Retained ticks.
    pub total_ticks: usize,
    /// Most recent price.
    pub latest_price: f64,
    /// Latest minus earliest retained price.
    pub price_change: f64,
    /// `price_change` relative to the earliest retained price, in percent.
    pub price_change_pct: f64,
    /// Volume summed over the last [`VOLUME_WINDOW`] ticks.
    pub volume: u64,
    /// Time of the most recent tick.
    pub last_tick_at: DateTime<Utc>,
}

/// Buffer occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferStatus {
    /// Buffered ticks.
    pub total_ticks: usize,
    /// Distinct symbols.
    pub symbols: usize,
    /// Maximum ticks.
    pub capacity: usize,
    /// Retention window in seconds.
    pub retention_secs: u64,
    /// Oldest buffered tick time.
    pub oldest_tick_at: Option<DateTime<Utc>>,
    /// Newest buffered tick time.
    pub newest_tick_at: Option<DateTime<Utc>>,
}

/// Selection applied by [`TickBuffer::ticks`]. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickFilter {
    /// Only ticks for this symbol.
    pub symbol: Option<String>,
    /// Only ticks at or after this time.
    pub start_time: Option<DateTime<Utc>>,
    /// Only ticks at or before this time.
    pub end_time: Option<DateTime<Utc>>,
}

impl TickFilter {
    /// Filter on one symbol.
    #[must_use]
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            ..Self::default()
        }
    }

    fn matches(&self, tick: &Tick) -> bool {
        self.symbol.as_deref().is_none_or(|s| tick.symbol == s)
            && self.start_time.is_none_or(|start| tick.timestamp >= start)
            && self.end_time.is_none_or(|end| tick.timestamp <= end)
    }
}

/// Bounded tick store.
#[derive(Debug)]
pub struct TickBuffer {
    ticks: RwLock<VecDeque<Tick>>,
    retention: Duration,
    capacity: usize,
}

impl Default for TickBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_CAPACITY)
    }
}

impl TickBuffer {
    /// Create a buffer. A zero capacity is treated as one.
    #[must_use]
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            ticks: RwLock::new(VecDeque::new()),
            retention,
            capacity: capacity.max(1),
        }
    }

    /// Append a tick and evict expired or excess ticks.
    pub fn push(&self, tick: Tick) {
        self.push_at(tick, Utc::now());
    }

    fn push_at(&self, tick: Tick, now: DateTime<Utc>) {
        let mut ticks = self.ticks.write();
        ticks.push_back(tick);
        while ticks.len() > self.capacity {
            ticks.pop_front();
        }
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|window| now.checked_sub_signed(window));
        if let Some(cutoff) = cutoff {
            while ticks.front().is_some_and(|t| t.timestamp < cutoff) {
                ticks.pop_front();
            }
        }
    }

    /// The last `limit` ticks matching `filter`, oldest first.
    #[must_use]
    pub fn ticks(&self, filter: &TickFilter, limit: usize) -> Vec<Tick> {
        let ticks = self.ticks.read();
        let mut selected: Vec<Tick> = ticks
            .iter()
            .rev()
            .filter(|t| filter.matches(t))
            .take(limit)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    /// Most recent tick for `symbol`.
    #[must_use]
    pub fn latest(&self, symbol: &str) -> Option<Tick> {
        self.ticks
            .read()
            .iter()
            .rev()
            .find(|t| t.symbol == symbol)
            .cloned()
    }

    /// Summary of the retained ticks for `symbol`.
    #[must_use]
    pub fn statistics(&self, symbol: &str) -> Option<TickStatistics> {
        let ticks = self.ticks.read();
        let series: Vec<&Tick> = ticks.iter().filter(|t| t.symbol == symbol).collect();
        let first = series.first()?;
        let last = series.last()?;

        let price_change = last.price - first.price;
        let price_change_pct = if first.price > 0.0 {
            price_change / first.price * 100.0
        } else {
            0.0
        };
        let volume = series
            .iter()
            .rev()
            .take(VOLUME_WINDOW)
            .map(|t| t.volume)
            .sum();

        Some(TickStatistics {
            symbol: symbol.to_string(),
            total_ticks: series.len(),
            latest_price: last.price,
            price_change,
            price_change_pct,
            volume,
            last_tick_at: last.timestamp,
        })
    }

    /// Distinct buffered symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.ticks
            .read()
            .iter()
            .map(|t| t.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The last `limit` ticks across all symbols, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Tick> {
        self.ticks.read().iter().rev().take(limit).cloned().collect()
    }

    /// Buffered tick count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.read().len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.read().is_empty()
    }

    /// Occupancy summary.
    #[must_use]
    pub fn status(&self) -> BufferStatus {
        let ticks = self.ticks.read();
        let symbols = ticks
            .iter()
            .map(|t| t.symbol.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        BufferStatus {
            total_ticks: ticks.len(),
            symbols,
            capacity: self.capacity,
            retention_secs: self.retention.as_secs(),
            oldest_tick_at: ticks.front().map(|t| t.timestamp),
            newest_tick_at: ticks.back().map(|t| t.timestamp),
        }
    }
}

impl TickStore for TickBuffer {
    fn push(&self, tick: Tick) {
        Self::push(self, tick);
    }
}
