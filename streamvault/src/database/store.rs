//! The job store seam.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::Job;
use crate::{Error, Result};

/// Durable backing for the job registry.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job.
    async fn put(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Job>;

    /// All stored jobs, oldest first.
    async fn list(&self) -> Result<Vec<Job>>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// DashMap-backed store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, Job>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Job> {
        self.jobs
            .get(id)
            .map(|job| job.clone())
            .ok_or_else(|| Error::not_found("Job", id))
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.jobs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("Job", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobSpec;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryJobStore::new();
        let job = Job::new(JobSpec::new("dQw4w9WgXcQ"));

        store.put(&job).await.unwrap();
        assert_eq!(store.get(&job.id).await.unwrap().content_id(), "dQw4w9WgXcQ");
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.delete(&job.id).await.unwrap();
        assert!(matches!(
            store.get(&job.id).await,
            Err(Error::NotFound { .. })
        ));
        assert!(store.delete(&job.id).await.is_err());
    }
}
