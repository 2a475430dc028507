//! Per-job execution units.
//!
//! [`DownloadRunner::spawn`] claims a job's single execution slot and spawns
//! a task that waits for admission, drives the [`Downloader`] through as many
//! attempts as the retry policy allows, folds its events into the registry,
//! and always leaves the job in a terminal state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::credentials::{CredentialSource, Credentials};
use super::engine::{DownloadEvent, DownloadHandle, DownloadRequest, Downloader, TerminalResult};
use super::resilience::RetryConfig;
use crate::domain::{Job, JobStatus};
use crate::registry::{ExecutionGuard, JobRegistry};
use crate::scheduler::Scheduler;
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Static settings applied to every download.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub output_directory: Option<PathBuf>,
    pub staging_directory: Option<PathBuf>,
    pub max_video_resolution: u32,
    pub extra_args: Vec<String>,
    pub credentials: CredentialSource,
    pub retry: RetryConfig,
    /// How long a cancelled download may take to wind down before its task
    /// is aborted.
    pub cancel_grace: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            output_directory: None,
            staging_directory: None,
            max_video_resolution: 4320,
            extra_args: Vec::new(),
            credentials: CredentialSource::default(),
            retry: RetryConfig::default(),
            cancel_grace: Duration::from_secs(30),
        }
    }
}

/// How one attempt ended, from the runner's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Success,
    Recoverable(String),
    Fatal(String),
    Unavailable(String),
    Cancelled,
}

impl From<TerminalResult> for Outcome {
    fn from(result: TerminalResult) -> Self {
        match result {
            TerminalResult::Success { .. } => Self::Success,
            TerminalResult::RecoverableError(msg) => Self::Recoverable(msg),
            TerminalResult::FatalError(msg) => Self::Fatal(msg),
            TerminalResult::Cancelled => Self::Cancelled,
        }
    }
}

impl From<Error> for Outcome {
    fn from(err: Error) -> Self {
        match err {
            Error::RecoverableDownload(msg) => Self::Recoverable(msg),
            Error::FatalDownload(msg) => Self::Fatal(msg),
            Error::UpstreamUnavailable(msg) => Self::Unavailable(msg),
            other => Self::Fatal(other.to_string()),
        }
    }
}

pub struct DownloadRunner {
    registry: Arc<JobRegistry>,
    scheduler: Scheduler,
    downloader: Arc<dyn Downloader>,
    settings: RunnerSettings,
    tasks: TaskTracker,
}

impl DownloadRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        scheduler: Scheduler,
        downloader: Arc<dyn Downloader>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            registry,
            scheduler,
            downloader,
            settings,
            tasks: TaskTracker::new(),
        }
    }

    pub fn downloader(&self) -> &Arc<dyn Downloader> {
        &self.downloader
    }

    /// Start the job's execution unit.
    ///
    /// Fails with [`Error::ExecutionActive`] if one is already running.
    pub async fn spawn(self: &Arc<Self>, job_id: &str) -> Result<JoinHandle<()>> {
        let guard = self.registry.claim_execution(job_id).await?;
        let token = self.registry.cancellation_token(job_id)?;
        let runner = Arc::clone(self);
        Ok(self.tasks.spawn(async move { runner.run(guard, token).await }))
    }

    /// Wait for every spawned execution unit to exit.
    pub async fn wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    async fn run(&self, guard: ExecutionGuard, token: CancellationToken) {
        let job_id = guard.job_id().to_string();
        let (status, cause) = match self.execute(&job_id, &token).await {
            Ok(Outcome::Success) => (JobStatus::Finished, Some("Finished downloading".to_string())),
            Ok(Outcome::Cancelled) => (JobStatus::Cancelled, Some("Download cancelled".to_string())),
            Ok(Outcome::Unavailable(reason)) => (JobStatus::Unavailable, Some(reason)),
            Ok(Outcome::Fatal(msg)) => (JobStatus::Error, Some(msg)),
            Ok(Outcome::Recoverable(msg)) => (JobStatus::Error, Some(msg)),
            Err(e) => (JobStatus::Error, Some(format!("Exception: {}", e))),
        };

        match self.registry.finish(&job_id, status, cause).await {
            Ok(true) => info!(job_id = %job_id, "Job ended as {}", status),
            Ok(false) => debug!(job_id = %job_id, "Job was already terminal"),
            Err(e) => error!(job_id = %job_id, "Failed to finalize job: {}", e),
        }
        drop(guard);
    }

    async fn execute(&self, job_id: &str, token: &CancellationToken) -> Result<Outcome> {
        let _admission = tokio::select! {
            _ = token.cancelled() => return Ok(Outcome::Cancelled),
            admission = self.scheduler.admit() => admission?,
        };

        let job = self.registry.get(job_id).await?;
        self.registry.append_log(job_id, "Started download task").await?;

        let credentials = match self.settings.credentials.resolve() {
            Ok(credentials) => credentials,
            Err(e) => return Ok(Outcome::from(e)),
        };

        let mut attempt = 0u32;
        loop {
            if token.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }

            let request = self.build_request(&job, &credentials, attempt);
            let outcome = self.attempt(request, token).await?;

            match outcome {
                Outcome::Recoverable(msg) if self.settings.retry.should_retry(attempt) => {
                    let delay = self.settings.retry.delay_for_attempt(attempt);
                    warn!(
                        job_id = %job_id,
                        attempt,
                        "Recoverable download error, retrying in {:?}: {}",
                        delay,
                        msg
                    );
                    self.registry
                        .append_log(
                            job_id,
                            format!("Recoverable error, retrying in {}s: {}", delay.as_secs(), msg),
                        )
                        .await?;
                    tokio::select! {
                        _ = token.cancelled() => return Ok(Outcome::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Outcome::Recoverable(msg) => {
                    return Ok(Outcome::Fatal(format!(
                        "Giving up after {} attempts: {}",
                        attempt + 1,
                        msg
                    )));
                }
                other => return Ok(other),
            }
        }
    }

    fn build_request(&self, job: &Job, credentials: &Credentials, attempt: u32) -> DownloadRequest {
        DownloadRequest {
            job_id: job.id.clone(),
            content_id: job.spec.content_id.clone(),
            url: job.spec.url(),
            output_directory: job
                .spec
                .output_directory
                .clone()
                .or_else(|| self.settings.output_directory.clone()),
            staging_directory: self.settings.staging_directory.clone(),
            parallelism: self.scheduler.parallelism(),
            max_video_resolution: self.settings.max_video_resolution,
            credentials: credentials.clone(),
            extra_args: self.settings.extra_args.clone(),
            attempt,
        }
    }

    /// Run one downloader attempt to its terminal result.
    async fn attempt(&self, request: DownloadRequest, token: &CancellationToken) -> Result<Outcome> {
        let job_id = request.job_id.clone();
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let attempt_token = token.child_token();
        let handle = Arc::new(DownloadHandle::new(
            job_id.clone(),
            attempt_token.clone(),
            event_tx,
        ));

        let downloader = Arc::clone(&self.downloader);
        let mut task = tokio::spawn(async move { downloader.start(request, handle).await });
        let mut cancel_deadline: Option<tokio::time::Instant> = None;

        let outcome = loop {
            let deadline = cancel_deadline;
            let grace = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(DownloadEvent::Finished(result)) => break Outcome::from(result),
                    Some(event) => {
                        if let Some(outcome) = self.apply_event(&job_id, event).await? {
                            break outcome;
                        }
                    }
                    // Every sender is gone without a terminal result.
                    None => break self.collect_start_result(&mut task, token).await,
                },
                _ = token.cancelled(), if cancel_deadline.is_none() => {
                    info!(job_id = %job_id, "Cancellation requested, waiting for downloader to stop");
                    cancel_deadline = Some(tokio::time::Instant::now() + self.settings.cancel_grace);
                }
                _ = grace => {
                    warn!(job_id = %job_id, "Downloader did not stop within {:?}, aborting", self.settings.cancel_grace);
                    task.abort();
                    break Outcome::Cancelled;
                }
            }
        };

        // Nothing of this attempt may outlive it.
        attempt_token.cancel();
        if !task.is_finished() {
            task.abort();
        }
        Ok(outcome)
    }

    async fn collect_start_result(
        &self,
        task: &mut JoinHandle<Result<()>>,
        token: &CancellationToken,
    ) -> Outcome {
        match task.await {
            Ok(Err(e)) => Outcome::from(e),
            Ok(Ok(())) if token.is_cancelled() => Outcome::Cancelled,
            Ok(Ok(())) => Outcome::Recoverable("Downloader stopped without a result".to_string()),
            Err(e) => Outcome::Fatal(format!("Downloader task failed: {}", e)),
        }
    }

    /// Fold a non-terminal event into the job. Returns an outcome when the
    /// event ends the attempt.
    async fn apply_event(&self, job_id: &str, event: DownloadEvent) -> Result<Option<Outcome>> {
        match event {
            DownloadEvent::Metadata { title, author } => {
                self.registry.update_metadata(job_id, title, author).await?;
            }
            DownloadEvent::Progress(update) => {
                if self.registry.status(job_id).await? == JobStatus::Waiting {
                    self.registry.transition(job_id, JobStatus::Downloading).await?;
                }
                self.registry.record_progress(job_id, &update).await?;
            }
            DownloadEvent::Message(text) => {
                self.registry.append_log(job_id, text).await?;
            }
            DownloadEvent::MuxStarted => {
                self.registry.advance(job_id, JobStatus::Muxing).await?;
                self.registry.append_log(job_id, "Started remux process").await?;
            }
            DownloadEvent::Unavailable { reason } => {
                return Ok(Some(Outcome::Unavailable(reason)));
            }
            DownloadEvent::Finished(result) => return Ok(Some(result.into())),
        }
        Ok(None)
    }
}
