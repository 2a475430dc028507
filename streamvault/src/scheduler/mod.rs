//! Admission control for execution units.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::{Error, Result};

/// Bounds concurrently-active jobs and carries the per-job fetch parallelism.
///
/// The active-job bound is a fair semaphore, so waiting jobs are admitted in
/// arrival order as earlier jobs release their admission.
#[derive(Debug, Clone)]
pub struct Scheduler {
    active_jobs: Option<Arc<Semaphore>>,
    max_concurrent_jobs: Option<usize>,
    parallelism: usize,
}

/// Held for as long as a job counts against the active-job bound.
#[derive(Debug)]
pub struct Admission {
    _permit: Option<OwnedSemaphorePermit>,
}

impl Scheduler {
    pub fn new(max_concurrent_jobs: Option<usize>, parallelism: usize) -> Self {
        Self {
            active_jobs: max_concurrent_jobs.map(|n| Arc::new(Semaphore::new(n))),
            max_concurrent_jobs,
            parallelism: parallelism.max(1),
        }
    }

    pub fn unbounded(parallelism: usize) -> Self {
        Self::new(None, parallelism)
    }

    /// Maximum in-flight fragment fetches per job.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn max_concurrent_jobs(&self) -> Option<usize> {
        self.max_concurrent_jobs
    }

    /// Free active-job slots, or `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.active_jobs.as_ref().map(|s| s.available_permits())
    }

    /// Wait for an active-job slot.
    pub async fn admit(&self) -> Result<Admission> {
        let permit = match &self.active_jobs {
            Some(semaphore) => {
                if semaphore.available_permits() == 0 {
                    debug!("Active job limit reached, queueing");
                }
                Some(
                    semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Other(format!("Semaphore error: {}", e)))?,
                )
            }
            None => None,
        };
        Ok(Admission { _permit: permit })
    }
}
