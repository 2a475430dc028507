//! Domain types: jobs, their lifecycle, and channel subscriptions.

pub mod job;
pub mod subscription;

pub use job::{HealthCheck, Job, JobProgress, JobSpec, JobStatus, LogEntry, ManifestProgress, ProgressUpdate};
pub use subscription::{ChannelSubscription, SeenSet, Term};
