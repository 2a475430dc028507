//! Routing bus events to notification sinks.
//!
//! Each target subscribes to a set of tags. An event is delivered to every
//! target whose tags intersect the event's; a target with no tags receives
//! nothing. Deliveries are independent tasks so a slow or failing sink never
//! holds up the others or the bus.

use std::collections::BTreeSet;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channels::{NotificationSink, build_sink, parse_sink_address};
use super::message::{Notification, render};
use crate::config::NotificationConfig;
use crate::events::{ArchiveEvent, EventBus};
use crate::Result;

/// A sink with the tags it wants.
#[derive(Clone)]
pub struct NotificationTarget {
    pub tags: BTreeSet<String>,
    pub sink: Arc<dyn NotificationSink>,
}

impl NotificationTarget {
    pub fn new(sink: Arc<dyn NotificationSink>, tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
            sink,
        }
    }

    pub fn accepts(&self, notification: &Notification) -> bool {
        !self.tags.is_disjoint(&notification.tags)
    }
}

impl std::fmt::Debug for NotificationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationTarget")
            .field("sink", &self.sink.display_address())
            .field("tags", &self.tags)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct NotificationDispatcher {
    targets: Vec<NotificationTarget>,
}

impl NotificationDispatcher {
    pub fn new(targets: Vec<NotificationTarget>) -> Self {
        Self { targets }
    }

    /// Build targets from configuration. Fails on the first bad address.
    pub fn from_config(configs: &[NotificationConfig], client: Client) -> Result<Self> {
        let targets = configs
            .iter()
            .map(|config| -> Result<NotificationTarget> {
                let address = parse_sink_address(&config.url)?;
                let sink = build_sink(address, client.clone());
                if config.tags.is_empty() {
                    warn!(
                        target_address = %sink.display_address(),
                        "Notification target has no tags and will receive nothing"
                    );
                }
                Ok(NotificationTarget::new(sink, config.tags.iter().cloned()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(targets))
    }

    pub fn targets(&self) -> &[NotificationTarget] {
        &self.targets
    }

    /// Spawn one delivery per interested target.
    pub fn dispatch(&self, event: &ArchiveEvent) -> Vec<JoinHandle<()>> {
        let Some(notification) = render(event) else {
            return Vec::new();
        };
        let notification = Arc::new(notification);

        self.targets
            .iter()
            .filter(|target| target.accepts(&notification))
            .map(|target| {
                let sink = Arc::clone(&target.sink);
                let notification = Arc::clone(&notification);
                tokio::spawn(async move {
                    match sink.send(&notification).await {
                        Ok(()) => debug!(
                            sink = sink.sink_type(),
                            event_type = notification.event_type,
                            "Notification delivered"
                        ),
                        Err(e) => warn!(
                            sink = %sink.display_address(),
                            "Failed to dispatch notification: {}",
                            e
                        ),
                    }
                })
            })
            .collect()
    }

    /// Listen on the bus until `token` is cancelled or the bus closes.
    pub fn start(
        self: Arc<Self>,
        bus: &EventBus,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = bus.receiver();
        info!(targets = self.targets.len(), "Notification dispatcher started");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Notification listener shutting down");
                        break;
                    }
                    result = rx.recv() => {
                        match result {
                            Ok(event) => {
                                self.dispatch(&event);
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Notification listener lagged by {} events", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}
