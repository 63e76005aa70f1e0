//! Timer management for the driver.
//!
//! Timers are spawned as tokio tasks and post back into the driver's event
//! channel when they fire. At most one timer per step kind is pending:
//! scheduling a new one for a kind cancels its predecessor, and a height
//! or round change cancels everything.

use crate::config::TimeoutConfig;
use accord_core::{Event, Timeout};
use accord_types::Step;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Manages the driver's pending timeouts.
pub struct TimerManager {
    config: TimeoutConfig,
    /// Pending timers (step kind -> task handle).
    timers: HashMap<Step, JoinHandle<()>>,
    /// Event sender for timer fires.
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    pub fn new(config: TimeoutConfig, event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            config,
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Schedule a timeout, replacing any pending timer of the same kind.
    pub fn schedule(&mut self, timeout: Timeout) {
        self.cancel(timeout.kind);

        let delay = self.config.delay(timeout.kind, timeout.round);
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trace!(?timeout, "timeout fired");
            let _ = event_tx.send(Event::TimeoutFired { timeout }).await;
        });

        self.timers.insert(timeout.kind, handle);
        debug!(?timeout, ?delay, "timeout scheduled");
    }

    /// Cancel the pending timer of one kind, if any.
    pub fn cancel(&mut self, kind: Step) {
        if let Some(handle) = self.timers.remove(&kind) {
            handle.abort();
            trace!(%kind, "timer cancelled");
        }
    }

    /// Cancel every pending timer. Called on height advance and shutdown.
    pub fn cancel_all(&mut self) {
        for (kind, handle) in self.timers.drain() {
            handle.abort();
            trace!(%kind, "timer cancelled");
        }
    }

    /// Number of pending timers.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
