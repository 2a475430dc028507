//! Upstream availability checks for active jobs.
//!
//! Results are recorded on the job's health record only; the lifecycle
//! status stays under the download runner's control.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use youtube_feeds::AvailabilityState;

use crate::Result;
use crate::config::HealthcheckConfig;
use crate::downloader::Downloader;
use crate::registry::JobRegistry;

pub struct HealthChecker {
    registry: Arc<JobRegistry>,
    downloader: Arc<dyn Downloader>,
    enabled: bool,
    interval: Duration,
    trigger: Notify,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<JobRegistry>,
        downloader: Arc<dyn Downloader>,
        config: &HealthcheckConfig,
    ) -> Self {
        Self {
            registry,
            downloader,
            enabled: config.enable_scheduled,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            trigger: Notify::new(),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.enabled
    }

    /// Run a check of every active job now, regardless of the interval.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Probe one job and record the result.
    pub async fn check_job(&self, job_id: &str) -> Result<String> {
        let job = self.registry.get(job_id).await?;
        let result = match self.downloader.probe(job.content_id()).await {
            Ok(availability) if availability.state == AvailabilityState::Unavailable => format!(
                "unavailable: {}",
                availability.reason.as_deref().unwrap_or("no reason given")
            ),
            Ok(availability) => format!("ok: {}", availability.state),
            Err(e) => format!("error: {}", e),
        };
        debug!(job_id = %job_id, "Health check: {}", result);
        self.registry.set_healthcheck(job_id, result.clone()).await?;
        Ok(result)
    }

    /// Check every non-terminal job. Returns how many were recorded.
    pub async fn check_all(&self) -> usize {
        let mut checked = 0;
        for job in self.registry.list_active().await {
            match self.check_job(&job.id).await {
                Ok(_) => checked += 1,
                Err(e) => warn!(job_id = %job.id, "Health check failed: {}", e),
            }
        }
        checked
    }

    pub fn start(self: &Arc<Self>, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            if checker.enabled {
                info!("Scheduled health checks every {:?}", checker.interval);
            }
            loop {
                let scheduled = async {
                    if checker.enabled {
                        tokio::time::sleep(checker.interval).await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                };
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => break,
                    _ = checker.trigger.notified() => debug!("Manual health check requested"),
                    _ = scheduled => {}
                }
                let checked = checker.check_all().await;
                debug!(checked, "Health check pass complete");
            }
            debug!("Health checker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use youtube_feeds::Availability;

    use crate::database::MemoryJobStore;
    use crate::domain::{JobSpec, JobStatus};
    use crate::downloader::{DownloadHandle, DownloadRequest};
    use crate::events::EventBus;

    struct GoneDownloader;

    #[async_trait]
    impl Downloader for GoneDownloader {
        fn name(&self) -> &'static str {
            "gone"
        }
        async fn start(&self, _request: DownloadRequest, _handle: Arc<DownloadHandle>) -> Result<()> {
            Ok(())
        }
        async fn probe(&self, content_id: &str) -> Result<Availability> {
            Ok(Availability::unavailable(content_id, "Video unavailable"))
        }
    }

    #[tokio::test]
    async fn test_check_records_result_without_changing_status() {
        let registry = Arc::new(JobRegistry::new(
            Arc::new(MemoryJobStore::new()),
            EventBus::new(),
        ));
        let job = registry.create(JobSpec::new("dQw4w9WgXcQ")).await.unwrap();
        let checker = HealthChecker::new(
            registry.clone(),
            Arc::new(GoneDownloader),
            &HealthcheckConfig::default(),
        );

        let result = checker.check_job(&job.id).await.unwrap();
        assert_eq!(result, "unavailable: Video unavailable");

        let job = registry.get(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.healthcheck.unwrap().result, result);
    }

    #[tokio::test]
    async fn test_manual_trigger_bypasses_schedule() {
        let registry = Arc::new(JobRegistry::new(
            Arc::new(MemoryJobStore::new()),
            EventBus::new(),
        ));
        let job = registry.create(JobSpec::new("dQw4w9WgXcQ")).await.unwrap();
        let checker = Arc::new(HealthChecker::new(
            registry.clone(),
            Arc::new(GoneDownloader),
            &HealthcheckConfig::default(),
        ));
        assert!(!checker.is_scheduled());

        let mut events = registry.events().subscribe();
        let token = CancellationToken::new();
        let task = checker.start(token.clone());
        checker.trigger_now();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.job_id(), Some(job.id.as_str()));
        assert_eq!(event.event_type(), "health_checked");

        token.cancel();
        task.await.unwrap();
    }
}
