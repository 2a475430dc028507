//! In-process event bus.
//!
//! A thin wrapper over [`tokio::sync::broadcast`]. Publishing never blocks; the
//! ring buffer keeps the most recent `capacity` events and receivers that fall
//! behind skip the oldest ones.

use tokio::sync::broadcast;
use tracing::warn;

use super::ArchiveEvent;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ArchiveEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Capacity is shared by all receivers and clamped to at least 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Dropped if nobody is subscribed.
    pub fn publish(&self, event: ArchiveEvent) {
        let _ = self.tx.send(event);
    }

    /// Raw receiver over every event published after this call.
    pub fn receiver(&self) -> broadcast::Receiver<ArchiveEvent> {
        self.tx.subscribe()
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            job_filter: None,
            dropped: 0,
        }
    }

    /// Subscription limited to events about one job.
    pub fn subscribe_job(&self, job_id: impl Into<String>) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            job_filter: Some(job_id.into()),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's view of the bus.
pub struct EventSubscription {
    rx: broadcast::Receiver<ArchiveEvent>,
    job_filter: Option<String>,
    dropped: u64,
}

impl EventSubscription {
    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ArchiveEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    warn!(skipped = n, "Event subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, event: &ArchiveEvent) -> bool {
        match &self.job_filter {
            Some(job_id) => event.job_id() == Some(job_id.as_str()),
            None => true,
        }
    }

    /// Events lost to lag so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
