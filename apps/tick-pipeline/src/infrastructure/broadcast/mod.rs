//! Tick Broadcast Hub
//!
//! Fans received ticks out to WebSocket clients over a tokio broadcast
//! channel. Slow receivers lag and skip; senders never block.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::ports::TickRelay;
use crate::domain::tick::Tick;

/// Default channel capacity.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 10_000;

/// Broadcast channel for received ticks.
#[derive(Debug)]
pub struct TickBroadcast {
    ticks_tx: broadcast::Sender<Tick>,
}

impl Default for TickBroadcast {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl TickBroadcast {
    /// Create a hub with the given capacity (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ticks_tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Send a tick to all subscribers.
    ///
    /// Returns the number of receivers, or `None` if there are none.
    pub fn send(&self, tick: Tick) -> Option<usize> {
        self.ticks_tx.send(tick).ok()
    }

    /// New receiver for ticks.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Tick> {
        self.ticks_tx.subscribe()
    }

    /// Number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.ticks_tx.receiver_count()
    }
}

impl TickRelay for TickBroadcast {
    fn relay(&self, tick: Tick) -> usize {
        self.send(tick).unwrap_or(0)
    }
}

/// Shared broadcast hub reference.
pub type SharedTickBroadcast = Arc<TickBroadcast>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tick::{TickGenerator, Ticker};

    #[test]
    fn send_without_receivers_is_none() {
        let hub = TickBroadcast::default();
        let tick = TickGenerator::default().generate(&Ticker::new("AAPL", 1.0, 1), 1);
        assert_eq!(hub.send(tick), None);
    }

    #[test]
    fn relay_reports_reached_subscribers() {
        let hub = TickBroadcast::default();
        let tick = TickGenerator::default().generate(&Ticker::new("AAPL", 1.0, 1), 1);
        assert_eq!(hub.relay(tick.clone()), 0);

        let _rx = hub.subscribe();
        assert_eq!(hub.relay(tick), 1);
    }

    #[test]
    fn receiver_count_tracks_drops() {
        let hub = TickBroadcast::default();
        {
            let _rx1 = hub.subscribe();
            let _rx2 = hub.subscribe();
            assert_eq!(hub.receiver_count(), 2);
        }
        assert_eq!(hub.receiver_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_ticks() {
        let hub = TickBroadcast::new(4);
        let mut rx = hub.subscribe();
        let tick = TickGenerator::default().generate(&Ticker::new("AAPL", 1.0, 1), 1);

        assert_eq!(hub.send(tick.clone()), Some(1));
        assert_eq!(rx.recv().await.unwrap(), tick);
    }
}
