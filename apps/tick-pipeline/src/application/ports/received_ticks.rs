//! Received Tick Ports (Driven Ports)
//!
//! Where the receiver puts accepted ticks: a queryable store and a live
//! relay to connected subscribers. Both are in-memory and never block.

use crate::domain::tick::Tick;

/// Port for retaining received ticks.
#[cfg_attr(test, mockall::automock)]
pub trait TickStore: Send + Sync {
    /// Retain one tick, evicting whatever the store's bounds require.
    fn push(&self, tick: Tick);
}

/// Port for fanning received ticks out to live subscribers.
#[cfg_attr(test, mockall::automock)]
pub trait TickRelay: Send + Sync {
    /// Relay one tick. Returns the number of subscribers it reached.
    fn relay(&self, tick: Tick) -> usize;
}
