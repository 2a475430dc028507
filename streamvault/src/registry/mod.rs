//! The job registry: the single source of truth for archive jobs.
//!
//! Each job lives in its own slot guarded by an async mutex, so mutations of
//! one job are serialized while unrelated jobs proceed independently. Every
//! durable mutation is written to the [`JobStore`] before it is committed in
//! memory; progress counters are kept in memory and flushed with the next
//! durable write.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::database::JobStore;
use crate::domain::{Job, JobSpec, JobStatus, LogEntry, ProgressUpdate};
use crate::events::{ArchiveEvent, EventBus};
use crate::{Error, Result};

struct JobSlot {
    job: Mutex<Job>,
    cancel: CancellationToken,
    executing: AtomicBool,
}

impl JobSlot {
    fn new(job: Job) -> Self {
        Self {
            job: Mutex::new(job),
            cancel: CancellationToken::new(),
            executing: AtomicBool::new(false),
        }
    }
}

/// Proof that the holder is the job's only execution unit. Released on drop.
pub struct ExecutionGuard {
    job_id: String,
    slot: Arc<JobSlot>,
}

impl ExecutionGuard {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.slot.executing.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGuard")
            .field("job_id", &self.job_id)
            .finish()
    }
}

pub struct JobRegistry {
    jobs: DashMap<String, Arc<JobSlot>>,
    store: Arc<dyn JobStore>,
    events: EventBus,
    /// Serializes the duplicate check in `create`.
    create_lock: Mutex<()>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobStore>, events: EventBus) -> Self {
        Self {
            jobs: DashMap::new(),
            store,
            events,
            create_lock: Mutex::new(()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn slot(&self, job_id: &str) -> Result<Arc<JobSlot>> {
        self.jobs
            .get(job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_found("Job", job_id))
    }

    fn slots(&self) -> Vec<Arc<JobSlot>> {
        self.jobs.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Apply `f` to a copy of the job, write it through, then commit it.
    async fn commit<R>(
        &self,
        job: &mut MutexGuard<'_, Job>,
        f: impl FnOnce(&mut Job) -> Result<R>,
    ) -> Result<R> {
        let mut next = (**job).clone();
        let out = f(&mut next)?;
        self.store.put(&next).await?;
        **job = next;
        Ok(out)
    }

    fn publish_status(&self, job: &Job, from: JobStatus, to: JobStatus) {
        info!(job_id = %job.id, "Job status {} -> {}", from, to);
        self.events.publish(ArchiveEvent::JobStatusChanged {
            job_id: job.id.clone(),
            content_id: job.spec.content_id.clone(),
            title: job.spec.title.clone(),
            author: job.spec.author.clone(),
            from,
            to,
            timestamp: Utc::now(),
        });
    }

    fn publish_log(&self, job_id: &str, entry: LogEntry) {
        self.events.publish(ArchiveEvent::JobLog {
            job_id: job_id.to_string(),
            entry,
        });
    }

    /// Load persisted jobs. Jobs that were still active when the process
    /// stopped have no execution unit anymore and are moved to `error`.
    ///
    /// Returns the number of interrupted jobs.
    pub async fn restore(&self) -> Result<usize> {
        let jobs = self.store.list().await?;
        let total = jobs.len();
        let mut interrupted = 0;

        for mut job in jobs {
            if !job.is_terminal() {
                job.status = job.status.transition_to(JobStatus::Error)?;
                job.append_log("Interrupted by restart", Utc::now());
                self.store.put(&job).await?;
                interrupted += 1;
            }
            self.jobs.insert(job.id.clone(), Arc::new(JobSlot::new(job)));
        }

        info!("Restored {} jobs ({} interrupted)", total, interrupted);
        Ok(interrupted)
    }

    /// Register a new job.
    ///
    /// Fails with [`Error::DuplicateJob`] while a non-terminal job for the
    /// same content exists.
    pub async fn create(&self, spec: JobSpec) -> Result<Job> {
        let _guard = self.create_lock.lock().await;

        if let Some(existing) = self.find_active_by_content(&spec.content_id).await {
            return Err(Error::DuplicateJob {
                content_id: spec.content_id,
                existing_id: existing.id,
            });
        }

        let job = Job::new(spec);
        self.store.put(&job).await?;
        self.jobs
            .insert(job.id.clone(), Arc::new(JobSlot::new(job.clone())));

        info!(job_id = %job.id, content_id = %job.content_id(), "Job created");
        self.events.publish(ArchiveEvent::JobCreated {
            job_id: job.id.clone(),
            content_id: job.spec.content_id.clone(),
            title: job.spec.title.clone(),
            timestamp: job.created_at,
        });
        Ok(job)
    }

    pub async fn get(&self, job_id: &str) -> Result<Job> {
        let slot = self.slot(job_id)?;
        let job = slot.job.lock().await;
        Ok(job.clone())
    }

    /// Snapshot of every job, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(self.jobs.len());
        for slot in self.slots() {
            jobs.push(slot.job.lock().await.clone());
        }
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Jobs not yet in a terminal state, oldest first.
    pub async fn list_active(&self) -> Vec<Job> {
        let mut jobs = self.list().await;
        jobs.retain(|job| !job.is_terminal());
        jobs
    }

    pub async fn find_active_by_content(&self, content_id: &str) -> Option<Job> {
        for slot in self.slots() {
            let job = slot.job.lock().await;
            if job.content_id() == content_id && !job.is_terminal() {
                return Some(job.clone());
            }
        }
        None
    }

    /// A job that already covers this content, in any state except
    /// `unavailable`. Such content is not captured again by the monitor.
    pub async fn find_capture_by_content(&self, content_id: &str) -> Option<Job> {
        for slot in self.slots() {
            let job = slot.job.lock().await;
            if job.content_id() == content_id && job.status != JobStatus::Unavailable {
                return Some(job.clone());
            }
        }
        None
    }

    /// Current status without cloning the job.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus> {
        let slot = self.slot(job_id)?;
        let status = slot.job.lock().await.status;
        Ok(status)
    }

    /// Move a job along one edge of the lifecycle graph.
    pub async fn transition(&self, job_id: &str, to: JobStatus) -> Result<Job> {
        let slot = self.slot(job_id)?;
        let mut job = slot.job.lock().await;
        let from = job.status;

        self.commit(&mut job, |job| {
            job.status = from.transition_to(to)?;
            job.updated_at = Utc::now();
            Ok(())
        })
        .await?;

        self.publish_status(&job, from, to);
        Ok(job.clone())
    }

    /// Walk the happy path up to `target`, emitting every intermediate
    /// transition. A no-op if the job is already there.
    pub async fn advance(&self, job_id: &str, target: JobStatus) -> Result<Job> {
        let slot = self.slot(job_id)?;
        let mut job = slot.job.lock().await;
        let from = job.status;
        if from == target {
            return Ok(job.clone());
        }

        let path = from.forward_path(target);
        if path.is_empty() {
            return Err(Error::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }

        self.commit(&mut job, |job| {
            job.status = target;
            job.updated_at = Utc::now();
            Ok(())
        })
        .await?;

        let mut prev = from;
        for step in path {
            self.publish_status(&job, prev, step);
            prev = step;
        }
        Ok(job.clone())
    }

    /// Put an active job into a terminal state, optionally with a final log
    /// line. Returns `false` if the job was already terminal.
    ///
    /// The terminal state is committed in memory even when the store write
    /// fails, so a job is never left active without an execution unit.
    pub async fn finish(&self, job_id: &str, status: JobStatus, log: Option<String>) -> Result<bool> {
        let slot = self.slot(job_id)?;
        let mut job = slot.job.lock().await;
        self.finish_locked(&mut job, status, log).await
    }

    async fn finish_locked(
        &self,
        job: &mut MutexGuard<'_, Job>,
        status: JobStatus,
        log: Option<String>,
    ) -> Result<bool> {
        if job.is_terminal() {
            return Ok(false);
        }

        let from = job.status;
        let path = if status == JobStatus::Finished {
            from.forward_path(status)
        } else {
            vec![from.transition_to(status)?]
        };
        if !status.is_terminal() || path.is_empty() {
            return Err(Error::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        let now = Utc::now();
        let mut next = (**job).clone();
        next.status = status;
        next.updated_at = now;
        let entry = log.map(|text| next.append_log(text, now));

        if let Err(e) = self.store.put(&next).await {
            error!(
                job_id = %next.id,
                "Failed to persist terminal status {}: {}",
                status,
                e
            );
        }
        **job = next;

        let mut prev = from;
        for step in path {
            self.publish_status(&**job, prev, step);
            prev = step;
        }
        if let Some(entry) = entry {
            self.publish_log(&job.id, entry);
        }
        Ok(true)
    }

    /// Fill in title/author once the downloader or a probe learns them.
    pub async fn update_metadata(
        &self,
        job_id: &str,
        title: Option<String>,
        author: Option<String>,
    ) -> Result<()> {
        let slot = self.slot(job_id)?;
        let mut job = slot.job.lock().await;

        let title = title.filter(|t| job.spec.title.as_ref() != Some(t));
        let author = author.filter(|a| job.spec.author.as_ref() != Some(a));
        if title.is_none() && author.is_none() {
            return Ok(());
        }

        self.commit(&mut job, |job| {
            if let Some(title) = title {
                job.spec.title = Some(title);
            }
            if let Some(author) = author {
                job.spec.author = Some(author);
            }
            job.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    pub async fn append_log(&self, job_id: &str, text: impl Into<String>) -> Result<LogEntry> {
        let slot = self.slot(job_id)?;
        let mut job = slot.job.lock().await;
        let text = text.into();

        let entry = self
            .commit(&mut job, |job| Ok(job.append_log(text, Utc::now())))
            .await?;
        debug!(job_id = %job_id, "{}", entry.text);
        self.publish_log(job_id, entry.clone());
        Ok(entry)
    }

    /// Merge a progress update. Ignored once the job is terminal.
    pub async fn record_progress(&self, job_id: &str, update: &ProgressUpdate) -> Result<()> {
        let slot = self.slot(job_id)?;
        let mut job = slot.job.lock().await;
        if job.is_terminal() {
            return Ok(());
        }

        job.record_progress(update, Instant::now());
        self.events.publish(ArchiveEvent::JobProgress {
            job_id: job.id.clone(),
            progress: job.progress(),
            current_manifest: job.current_manifest.clone(),
            eta_secs: job.eta().map(|eta| eta.as_secs()),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record a health probe result. Never changes the lifecycle status.
    pub async fn set_healthcheck(&self, job_id: &str, result: impl Into<String>) -> Result<()> {
        let slot = self.slot(job_id)?;
        let mut job = slot.job.lock().await;
        let result = result.into();
        let now = Utc::now();

        let record = result.clone();
        self.commit(&mut job, |job| {
            job.healthcheck = Some(crate::domain::HealthCheck {
                result: record,
                last_checked_at: now,
            });
            Ok(())
        })
        .await?;

        self.events.publish(ArchiveEvent::HealthChecked {
            job_id: job_id.to_string(),
            result,
            timestamp: now,
        });
        Ok(())
    }

    /// Ask a job to stop.
    ///
    /// Returns `Ok(false)` for a job that is already terminal. A job with no
    /// live execution unit is cancelled immediately; otherwise the execution
    /// unit observes the token and finalizes the job.
    pub async fn request_cancel(&self, job_id: &str) -> Result<bool> {
        let slot = self.slot(job_id)?;
        let mut job = slot.job.lock().await;
        if job.is_terminal() {
            return Ok(false);
        }

        if !job.cancel_requested {
            let entry = self
                .commit(&mut job, |job| {
                    job.cancel_requested = true;
                    Ok(job.append_log("Cancellation requested", Utc::now()))
                })
                .await?;
            self.publish_log(job_id, entry);
        }
        slot.cancel.cancel();

        if !slot.executing.load(Ordering::Acquire) {
            self.finish_locked(&mut job, JobStatus::Cancelled, None).await?;
        }
        Ok(true)
    }

    /// Remove a terminal job from the registry and the store.
    pub async fn delete(&self, job_id: &str) -> Result<()> {
        let slot = self.slot(job_id)?;
        let job = slot.job.lock().await;
        if !job.is_terminal() {
            return Err(Error::JobActive(job_id.to_string()));
        }

        match self.store.delete(job_id).await {
            Ok(()) | Err(Error::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        self.jobs.remove(job_id);
        drop(job);

        info!(job_id = %job_id, "Job deleted");
        self.events.publish(ArchiveEvent::JobDeleted {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Claim the right to run the job's single execution unit.
    pub async fn claim_execution(&self, job_id: &str) -> Result<ExecutionGuard> {
        let slot = self.slot(job_id)?;
        let job = slot.job.lock().await;
        if job.is_terminal() {
            return Err(Error::InvalidStateTransition {
                from: job.status.as_str().to_string(),
                to: JobStatus::Downloading.as_str().to_string(),
            });
        }
        if slot
            .executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ExecutionActive(job_id.to_string()));
        }
        drop(job);

        Ok(ExecutionGuard {
            job_id: job_id.to_string(),
            slot,
        })
    }

    pub fn is_executing(&self, job_id: &str) -> bool {
        self.jobs
            .get(job_id)
            .is_some_and(|slot| slot.executing.load(Ordering::Acquire))
    }

    /// Token cancelled when the job is asked to stop.
    pub fn cancellation_token(&self, job_id: &str) -> Result<CancellationToken> {
        Ok(self.slot(job_id)?.cancel.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
