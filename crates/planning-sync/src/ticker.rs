//! Scheduling for the periodic loops.
//!
//! Loops wait on a [`Ticker`] instead of sleeping directly, so tests can
//! drive them one pass at a time.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick. `false` means the schedule has ended.
    async fn tick(&mut self) -> bool;
}

/// Fixed-period ticker; the first tick fires immediately.
///
/// A pass that overruns the period delays the following ticks instead of
/// firing a burst.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticker driven by hand through a [`TickHandle`].
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

/// Sender side of a [`ManualTicker`]. Dropping every handle ends the schedule.
#[derive(Clone)]
pub struct TickHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicker {
    pub fn new() -> (Self, TickHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, TickHandle { tx })
    }

    /// A ticker that fires `count` times and then ends.
    pub fn times(count: usize) -> Self {
        let (ticker, handle) = Self::new();
        for _ in 0..count {
            handle.tick();
        }
        ticker
    }
}

impl TickHandle {
    pub fn tick(&self) {
        let _ = self.tx.send(());
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}
