//! Ready-Symbol Threshold
//!
//! Pure state machine behind the streaming controller. It tracks which
//! symbols have finished loading and decides when the pipeline moves from
//! accumulating data to streaming ticks.
//!
//! ```text
//!            add symbol              |ready| >= threshold
//!   Idle ───────────────► Accumulating ──────────────────► Streaming
//!    ▲                                  peer threshold / poll   │
//!    └──────────────────────────── stop ────────────────────────┘
//! ```
//!
//! Once streaming, the machine only leaves that phase through
//! [`ThresholdState::stop`] (or [`ThresholdState::abort_start`] when the
//! tick loop could not be started).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Controller phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingPhase {
    /// Nothing ready yet, or stopped.
    #[default]
    Idle,
    /// Collecting ready symbols below the threshold.
    Accumulating,
    /// Tick loop running.
    Streaming,
}

impl StreamingPhase {
    /// Phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Accumulating => "accumulating",
            Self::Streaming => "streaming",
        }
    }
}

/// Why streaming started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartReason {
    /// Local ready set reached the threshold.
    ThresholdMet,
    /// A peer announced the threshold.
    PeerThreshold,
    /// The authoritative symbol count reached the threshold.
    Poll,
    /// Explicit start command.
    Manual,
}

impl StartReason {
    /// Reason name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ThresholdMet => "threshold_met",
            Self::PeerThreshold => "peer_threshold",
            Self::Poll => "poll",
            Self::Manual => "manual",
        }
    }
}

/// Outcome of feeding an input into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Phase did not change.
    Unchanged,
    /// First ready symbol arrived.
    EnteredAccumulating,
    /// Phase moved to streaming; the caller must start the tick loop.
    StartStreaming(StartReason),
}

/// Ready-symbol set, threshold and phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdState {
    ready_symbols: BTreeSet<String>,
    threshold: usize,
    phase: StreamingPhase,
    armed: bool,
}

impl ThresholdState {
    /// Create an empty, armed state. A zero threshold is treated as one.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            ready_symbols: BTreeSet::new(),
            threshold: threshold.max(1),
            phase: StreamingPhase::Idle,
            armed: true,
        }
    }

    /// Rebuild from a persisted ready set. Never restores into streaming.
    #[must_use]
    pub fn restore(threshold: usize, ready_symbols: impl IntoIterator<Item = String>) -> Self {
        let mut state = Self::new(threshold);
        state.ready_symbols.extend(ready_symbols);
        if !state.ready_symbols.is_empty() {
            state.phase = StreamingPhase::Accumulating;
        }
        state
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> StreamingPhase {
        self.phase
    }

    /// Whether the tick loop should be running.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self.phase, StreamingPhase::Streaming)
    }

    /// Whether automatic triggers may start streaming.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Required number of ready symbols.
    #[must_use]
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    /// Ready symbols, sorted.
    #[must_use]
    pub const fn ready_symbols(&self) -> &BTreeSet<String> {
        &self.ready_symbols
    }

    /// Number of ready symbols.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.ready_symbols.len()
    }

    /// Record symbols that finished loading.
    pub fn add_symbols<I>(&mut self, symbols: I) -> Transition
    where
        I: IntoIterator<Item = String>,
    {
        let entered = self.extend(symbols);
        if self.armed && !self.is_streaming() && self.ready_count() >= self.threshold {
            return self.enter_streaming(StartReason::ThresholdMet);
        }
        if entered {
            Transition::EnteredAccumulating
        } else {
            Transition::Unchanged
        }
    }

    /// Re-check the threshold without new input, e.g. after a restore.
    pub fn evaluate(&mut self) -> Transition {
        self.add_symbols(std::iter::empty())
    }

    /// A peer announced the threshold; start regardless of the local count.
    pub fn peer_threshold<I>(&mut self, symbols: I) -> Transition
    where
        I: IntoIterator<Item = String>,
    {
        let entered = self.extend(symbols);
        if self.armed && !self.is_streaming() {
            return self.enter_streaming(StartReason::PeerThreshold);
        }
        if entered {
            Transition::EnteredAccumulating
        } else {
            Transition::Unchanged
        }
    }

    /// Result of polling the authoritative symbol count.
    ///
    /// `listing` populates the ready set when the count meets the threshold.
    pub fn polled<I>(&mut self, count: usize, listing: I) -> Transition
    where
        I: IntoIterator<Item = String>,
    {
        if !self.armed || self.is_streaming() || count < self.threshold {
            return Transition::Unchanged;
        }
        self.extend(listing);
        self.enter_streaming(StartReason::Poll)
    }

    /// Explicit start: re-arm automatic triggers and stream now.
    pub fn start(&mut self) -> Transition {
        self.armed = true;
        if self.is_streaming() {
            return Transition::Unchanged;
        }
        self.enter_streaming(StartReason::Manual)
    }

    /// Explicit stop: back to idle and disarm automatic triggers.
    ///
    /// Returns whether the state was streaming.
    pub fn stop(&mut self) -> bool {
        let was_streaming = self.is_streaming();
        self.phase = StreamingPhase::Idle;
        self.armed = false;
        was_streaming
    }

    /// Undo a streaming transition whose tick loop could not start.
    pub fn abort_start(&mut self) {
        if self.is_streaming() {
            self.phase = self.resting_phase();
        }
    }

    fn extend<I>(&mut self, symbols: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        self.ready_symbols
            .extend(symbols.into_iter().filter(|s| !s.trim().is_empty()));
        if self.phase == StreamingPhase::Idle && !self.ready_symbols.is_empty() {
            self.phase = StreamingPhase::Accumulating;
            return true;
        }
        false
    }

    const fn enter_streaming(&mut self, reason: StartReason) -> Transition {
        self.phase = StreamingPhase::Streaming;
        Transition::StartStreaming(reason)
    }

    fn resting_phase(&self) -> StreamingPhase {
        if self.ready_symbols.is_empty() {
            StreamingPhase::Idle
        } else {
            StreamingPhase::Accumulating
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn fifth_symbol_starts_streaming_once() {
        let mut state = ThresholdState::new(5);

        assert_eq!(
            state.add_symbols(symbols(&["A"])),
            Transition::EnteredAccumulating
        );
        for name in ["B", "C", "D"] {
            assert_eq!(state.add_symbols(symbols(&[name])), Transition::Unchanged);
        }
        assert_eq!(state.phase(), StreamingPhase::Accumulating);

        assert_eq!(
            state.add_symbols(symbols(&["E"])),
            Transition::StartStreaming(StartReason::ThresholdMet)
        );
        assert_eq!(state.add_symbols(symbols(&["F"])), Transition::Unchanged);
        assert!(state.is_streaming());
        assert_eq!(state.ready_count(), 6);
    }

    #[test]
    fn duplicate_symbols_do_not_count() {
        let mut state = ThresholdState::new(2);
        state.add_symbols(symbols(&["AAPL"]));
        assert_eq!(state.add_symbols(symbols(&["AAPL"])), Transition::Unchanged);
        assert_eq!(state.phase(), StreamingPhase::Accumulating);
    }

    #[test]
    fn blank_symbols_are_ignored() {
        let mut state = ThresholdState::new(2);
        assert_eq!(state.add_symbols(symbols(&["", "  "])), Transition::Unchanged);
        assert_eq!(state.phase(), StreamingPhase::Idle);
    }

    #[test]
    fn peer_threshold_starts_below_local_count() {
        let mut state = ThresholdState::new(30);
        assert_eq!(
            state.peer_threshold(symbols(&["AAPL", "MSFT"])),
            Transition::StartStreaming(StartReason::PeerThreshold)
        );
        assert_eq!(state.ready_count(), 2);
    }

    #[test_case(29, false ; "below threshold")]
    #[test_case(30, true ; "at threshold")]
    #[test_case(45, true ; "above threshold")]
    fn poll_respects_threshold(count: usize, starts: bool) {
        let mut state = ThresholdState::new(30);
        let transition = state.polled(count, symbols(&["AAPL", "MSFT"]));
        assert_eq!(
            transition == Transition::StartStreaming(StartReason::Poll),
            starts
        );
        assert_eq!(state.is_streaming(), starts);
        assert_eq!(state.ready_count(), if starts { 2 } else { 0 });
    }

    #[test]
    fn stop_disarms_automatic_triggers() {
        let mut state = ThresholdState::new(1);
        state.add_symbols(symbols(&["AAPL"]));
        assert!(state.stop());
        assert_eq!(state.phase(), StreamingPhase::Idle);

        assert_eq!(state.add_symbols(symbols(&["MSFT"])), Transition::EnteredAccumulating);
        assert_eq!(state.polled(10, symbols(&["IBM"])), Transition::Unchanged);
        assert_eq!(state.peer_threshold(Vec::new()), Transition::Unchanged);
        assert!(!state.is_streaming());
    }

    #[test]
    fn start_rearms_and_streams() {
        let mut state = ThresholdState::new(10);
        state.stop();
        assert_eq!(
            state.start(),
            Transition::StartStreaming(StartReason::Manual)
        );
        assert!(state.is_armed());
        assert_eq!(state.start(), Transition::Unchanged);
    }

    #[test]
    fn abort_start_returns_to_resting_phase() {
        let mut state = ThresholdState::new(1);
        state.start();
        state.abort_start();
        assert_eq!(state.phase(), StreamingPhase::Idle);

        state.add_symbols(symbols(&["AAPL"]));
        assert!(state.is_streaming());
        state.abort_start();
        assert_eq!(state.phase(), StreamingPhase::Accumulating);
    }

    #[test]
    fn restore_never_streams() {
        let state = ThresholdState::restore(2, symbols(&["A", "B", "C"]));
        assert_eq!(state.phase(), StreamingPhase::Accumulating);
        assert_eq!(ThresholdState::restore(2, Vec::new()).phase(), StreamingPhase::Idle);
    }

    #[test]
    fn evaluate_starts_restored_state_at_threshold() {
        let mut state = ThresholdState::restore(2, symbols(&["A", "B"]));
        assert_eq!(
            state.evaluate(),
            Transition::StartStreaming(StartReason::ThresholdMet)
        );
    }

    #[test]
    fn zero_threshold_is_one() {
        assert_eq!(ThresholdState::new(0).threshold(), 1);
    }
}
