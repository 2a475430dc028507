//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use youtube_feeds::{Availability, AvailabilityState, FeedEntry};

use streamvault::database::MemoryJobStore;
use streamvault::domain::{ChannelSubscription, JobStatus};
use streamvault::downloader::{
    DownloadEvent, DownloadHandle, DownloadRequest, DownloadRunner, Downloader, RetryConfig,
    RunnerSettings, TerminalResult,
};
use streamvault::events::EventBus;
use streamvault::monitor::{FeedMonitor, FeedMonitorConfig, FeedSource};
use streamvault::notification::{Notification, NotificationSink};
use streamvault::registry::JobRegistry;
use streamvault::scheduler::Scheduler;
use streamvault::{Error, Result};

pub fn live(content_id: &str) -> Availability {
    Availability {
        content_id: content_id.to_string(),
        state: AvailabilityState::Upcoming,
        reason: None,
        is_live_content: true,
        scheduled_start: Some(Utc::now()),
        title: Some(format!("Stream {}", content_id)),
        author: Some("Singer".to_string()),
        channel_id: None,
        thumbnail_url: None,
    }
}

/// A downloader driven by a per-run script.
///
/// With `hold` set the download keeps running after the script until it is
/// cancelled, then reports `Cancelled`. With `stuck` set it never reports a
/// result and ignores cancellation.
pub struct FakeDownloader {
    pub script: Vec<DownloadEvent>,
    pub hold: bool,
    pub stuck: bool,
    pub probes: Mutex<HashMap<String, Result<Availability>>>,
    pub started: Mutex<Vec<DownloadRequest>>,
}

impl FakeDownloader {
    pub fn finishing(script: Vec<DownloadEvent>) -> Self {
        Self {
            script,
            hold: false,
            stuck: false,
            probes: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn holding(script: Vec<DownloadEvent>) -> Self {
        Self {
            hold: true,
            ..Self::finishing(script)
        }
    }

    pub fn stuck(script: Vec<DownloadEvent>) -> Self {
        Self {
            stuck: true,
            ..Self::finishing(script)
        }
    }

    pub fn set_probe(&self, content_id: &str, result: Result<Availability>) {
        self.probes.lock().insert(content_id.to_string(), result);
    }

    pub fn start_count(&self) -> usize {
        self.started.lock().len()
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start(&self, request: DownloadRequest, handle: Arc<DownloadHandle>) -> Result<()> {
        self.started.lock().push(request);
        let script = self.script.clone();
        let hold = self.hold;
        let stuck = self.stuck;
        tokio::spawn(async move {
            for event in script {
                if !handle.send(event).await {
                    return;
                }
            }
            if stuck {
                // Keeps the handle open forever.
                let _handle = handle;
                std::future::pending::<()>().await;
            } else if hold {
                handle.cancellation_token.cancelled().await;
                handle
                    .send(DownloadEvent::Finished(TerminalResult::Cancelled))
                    .await;
            }
        });
        Ok(())
    }

    async fn probe(&self, content_id: &str) -> Result<Availability> {
        match self.probes.lock().get(content_id) {
            Some(Ok(availability)) => Ok(availability.clone()),
            Some(Err(e)) => Err(Error::Other(e.to_string())),
            None => Ok(live(content_id)),
        }
    }
}

/// Serves canned feeds; a channel without one fails to fetch.
#[derive(Default)]
pub struct FakeFeedSource {
    feeds: Mutex<HashMap<String, Vec<FeedEntry>>>,
}

impl FakeFeedSource {
    pub fn set(&self, channel_id: &str, entries: Vec<FeedEntry>) {
        self.feeds.lock().insert(channel_id.to_string(), entries);
    }

    pub fn remove(&self, channel_id: &str) {
        self.feeds.lock().remove(channel_id);
    }
}

#[async_trait]
impl FeedSource for FakeFeedSource {
    async fn fetch(&self, channel_id: &str) -> Result<Vec<FeedEntry>> {
        self.feeds
            .lock()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| Error::feed_fetch(channel_id, "connection reset"))
    }
}

pub fn entry(item_id: &str, title: &str, description: &str) -> FeedEntry {
    FeedEntry {
        item_id: item_id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        author: Some("Singer".to_string()),
        ..Default::default()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn sink_type(&self) -> &'static str {
        "recording"
    }

    fn display_address(&self) -> String {
        "memory://recording".to_string()
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub registry: Arc<JobRegistry>,
    pub runner: Arc<DownloadRunner>,
    pub downloader: Arc<FakeDownloader>,
}

impl Harness {
    pub fn new(downloader: FakeDownloader) -> Self {
        Self::with_scheduler(downloader, Scheduler::unbounded(1))
    }

    pub fn with_scheduler(downloader: FakeDownloader, scheduler: Scheduler) -> Self {
        Self::build(downloader, scheduler, Duration::from_secs(5))
    }

    pub fn with_cancel_grace(downloader: FakeDownloader, cancel_grace: Duration) -> Self {
        Self::build(downloader, Scheduler::unbounded(1), cancel_grace)
    }

    fn build(downloader: FakeDownloader, scheduler: Scheduler, cancel_grace: Duration) -> Self {
        let registry = Arc::new(JobRegistry::new(
            Arc::new(MemoryJobStore::new()),
            EventBus::new(),
        ));
        let downloader = Arc::new(downloader);
        let settings = RunnerSettings {
            retry: RetryConfig::disabled(),
            cancel_grace,
            ..Default::default()
        };
        let runner = Arc::new(DownloadRunner::new(
            Arc::clone(&registry),
            scheduler,
            downloader.clone(),
            settings,
        ));
        Self {
            registry,
            runner,
            downloader,
        }
    }

    pub fn monitor(
        &self,
        subscriptions: Vec<ChannelSubscription>,
        source: Arc<FakeFeedSource>,
    ) -> Arc<FeedMonitor> {
        let config = FeedMonitorConfig {
            probe_interval: Duration::ZERO,
            ..Default::default()
        };
        Arc::new(
            FeedMonitor::new(
                subscriptions,
                source,
                Arc::clone(&self.registry),
                Arc::clone(&self.runner),
                config,
            )
            .unwrap(),
        )
    }

    /// Poll until the job reaches `status` or a few seconds pass.
    pub async fn wait_for_status(&self, job_id: &str, status: JobStatus) -> JobStatus {
        for _ in 0..300 {
            let current = self.registry.get(job_id).await.unwrap().status;
            if current == status {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.registry.get(job_id).await.unwrap().status
    }
}
