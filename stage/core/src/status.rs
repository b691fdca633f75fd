//! Status Messenger
//!
//! Rotates a persona's status lines while the stage is listening. The first
//! line shows immediately; a ticker task then asks the stage to advance on a
//! fixed interval. Each start opens a new epoch so ticks from an earlier
//! rotation are recognised and ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::events::{StageEvent, StatusEpoch};

/// Cyclic status-line rotation
pub struct StatusMessenger {
    interval: Duration,
    events: mpsc::Sender<StageEvent>,
    epoch: StatusEpoch,
    index: usize,
    messages: Vec<String>,
    ticker: Option<AbortHandle>,
}

impl StatusMessenger {
    /// Create an idle messenger
    pub fn new(interval: Duration, events: mpsc::Sender<StageEvent>) -> Self {
        Self {
            interval,
            events,
            epoch: StatusEpoch::default(),
            index: 0,
            messages: Vec::new(),
            ticker: None,
        }
    }

    /// Show the first message and start rotating. Restarts if running.
    pub fn start(&mut self, messages: &[String]) {
        self.stop();
        self.epoch = self.epoch.next();
        self.index = 0;
        self.messages = messages.to_vec();

        if self.messages.len() > 1 {
            let events = self.events.clone();
            let epoch = self.epoch;
            let period = self.interval;
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    if events.send(StageEvent::StatusTick { epoch }).await.is_err() {
                        break;
                    }
                }
            });
            self.ticker = Some(task.abort_handle());
        }

        if let Some(first) = self.current() {
            tracing::debug!(message = first, "Status message");
        }
    }

    /// Advance to the next message. Returns the new message, or `None` for a
    /// tick from a stopped or restarted rotation.
    pub fn on_tick(&mut self, epoch: StatusEpoch) -> Option<&str> {
        if epoch != self.epoch || self.messages.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.messages.len();
        let message = self.messages[self.index].as_str();
        tracing::debug!(message, "Status message");
        Some(message)
    }

    /// Stop rotating and clear the message. Idempotent.
    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if !self.messages.is_empty() {
            self.messages.clear();
            self.epoch = self.epoch.next();
        }
        self.index = 0;
    }

    /// Message currently displayed
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.messages.get(self.index).map(String::as_str)
    }

    /// Whether a rotation is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.messages.is_empty()
    }
}

impl Drop for StatusMessenger {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}
