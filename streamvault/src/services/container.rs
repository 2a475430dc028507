//! Service container for dependency injection.
//!
//! The ServiceContainer holds references to all application services
//! and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use youtube_feeds::{FeedClient, PlayerClient, extract_content_id};

use crate::config::AppConfig;
use crate::database::JobStore;
use crate::domain::{Job, JobSpec};
use crate::downloader::{
    CommandDownloader, CredentialSource, DownloadRunner, Downloader, RunnerSettings,
};
use crate::events::EventBus;
use crate::health::HealthChecker;
use crate::monitor::{FeedMonitor, FeedMonitorConfig, FeedSource, YouTubeFeedSource};
use crate::notification::NotificationDispatcher;
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;
use crate::{Error, Result};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Counters for a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStats {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub running_units: usize,
    pub monitored_channels: usize,
}

/// Service container holding all application services.
pub struct ServiceContainer {
    pub events: EventBus,
    pub registry: Arc<JobRegistry>,
    pub scheduler: Scheduler,
    pub runner: Arc<DownloadRunner>,
    pub monitor: Arc<FeedMonitor>,
    pub health: Arc<HealthChecker>,
    pub dispatcher: Arc<NotificationDispatcher>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build the production services: the external downloader command and
    /// the public channel feeds.
    pub fn new(config: &AppConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        let client = youtube_feeds::default_client()?;
        let player = PlayerClient::new(client.clone())
            .with_visitor_data(config.downloader.visitor_data.clone());
        let downloader = Arc::new(CommandDownloader::new(
            config.downloader.command.clone(),
            player,
        ));
        let source = Arc::new(YouTubeFeedSource::new(FeedClient::new(client.clone())));
        Self::with_components(config, store, downloader, source, client)
    }

    /// Build the services around the given downloader and feed source.
    pub fn with_components(
        config: &AppConfig,
        store: Arc<dyn JobStore>,
        downloader: Arc<dyn Downloader>,
        source: Arc<dyn FeedSource>,
        client: Client,
    ) -> Result<Self> {
        info!("Initializing service container");

        let events = EventBus::new();
        let registry = Arc::new(JobRegistry::new(store, events.clone()));

        let downloader_config = &config.downloader;
        let scheduler = Scheduler::new(
            downloader_config.max_concurrent_jobs,
            downloader_config.num_parallel_downloads,
        );
        let settings = RunnerSettings {
            output_directory: downloader_config.output_directory.clone(),
            staging_directory: downloader_config.staging_directory.clone(),
            max_video_resolution: downloader_config.max_video_resolution,
            extra_args: downloader_config.extra_args.clone(),
            credentials: CredentialSource {
                po_token: downloader_config.po_token.clone(),
                visitor_data: downloader_config.visitor_data.clone(),
                cookie_file: downloader_config.cookie_file.clone(),
            },
            retry: downloader_config.retry.clone(),
            cancel_grace: Duration::from_secs(downloader_config.cancel_grace_secs),
        };
        let runner = Arc::new(DownloadRunner::new(
            Arc::clone(&registry),
            scheduler.clone(),
            Arc::clone(&downloader),
            settings,
        ));

        let monitor = Arc::new(FeedMonitor::new(
            config.subscriptions()?,
            source,
            Arc::clone(&registry),
            Arc::clone(&runner),
            FeedMonitorConfig::from(&config.feeds),
        )?);
        let health = Arc::new(HealthChecker::new(
            Arc::clone(&registry),
            downloader,
            &config.healthchecks,
        ));
        let dispatcher = Arc::new(NotificationDispatcher::from_config(
            &config.notifications,
            client,
        )?);

        Ok(Self {
            events,
            registry,
            scheduler,
            runner,
            monitor,
            health,
            dispatcher,
            tasks: parking_lot::Mutex::new(Vec::new()),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Start the background services.
    ///
    /// The dispatcher subscribes first so it sees every event the other
    /// services publish.
    pub fn start(&self) {
        let token = self.cancellation_token.clone();
        let mut tasks = self.tasks.lock();

        tasks.push(Arc::clone(&self.dispatcher).start(&self.events, token.child_token()));
        tasks.extend(self.monitor.start(token.child_token()));
        tasks.push(self.health.start(token.child_token()));

        info!(
            channels = self.monitor.channel_ids().len(),
            notification_targets = self.dispatcher.targets().len(),
            max_concurrent_jobs = ?self.scheduler.max_concurrent_jobs(),
            scheduled_healthchecks = self.health.is_scheduled(),
            "Services started"
        );
    }

    /// Queue a capture for a URL or bare content id.
    pub async fn enqueue(&self, url_or_id: &str) -> Result<Job> {
        let content_id = extract_content_id(url_or_id).ok_or_else(|| {
            Error::Other(format!("Could not find a content id in '{}'", url_or_id))
        })?;

        if let Some(existing) = self.registry.find_active_by_content(&content_id).await {
            return Err(Error::DuplicateJob {
                content_id,
                existing_id: existing.id,
            });
        }

        let availability = self.runner.downloader().probe(&content_id).await?;
        let mut spec = JobSpec::new(&content_id);
        spec.title = availability.title;
        spec.author = availability.author;
        spec.channel_id = availability.channel_id;
        spec.scheduled_start = availability.scheduled_start;
        spec.thumbnail_url = availability.thumbnail_url;
        spec.source_url = Some(url_or_id.trim().to_string());

        let job = self.registry.create(spec).await?;
        self.registry
            .append_log(&job.id, "Queued by request")
            .await?;
        self.runner.spawn(&job.id).await?;
        info!(job_id = %job.id, content_id = %content_id, "Enqueued job");
        self.registry.get(&job.id).await
    }

    /// Run a health check pass over active jobs now.
    pub fn trigger_healthcheck(&self) {
        self.health.trigger_now();
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    ///
    /// Active jobs are cancelled through their own tokens and end as
    /// `cancelled`.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        let active = self.registry.list_active().await;
        for job in &active {
            if let Err(e) = self.registry.request_cancel(&job.id).await {
                warn!(job_id = %job.id, "Failed to cancel job: {}", e);
            }
        }
        info!("Cancelled {} active jobs", active.len());

        if tokio::time::timeout(timeout, self.runner.wait()).await.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            total_jobs: self.registry.len(),
            active_jobs: self.registry.list_active().await.len(),
            running_units: self.runner.active(),
            monitored_channels: self.monitor.channel_ids().len(),
        }
    }
}
