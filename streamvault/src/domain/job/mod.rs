//! Archive job domain types.

pub mod entity;
pub mod progress;
pub mod state;

pub use entity::{HealthCheck, Job, JobSpec, LogEntry};
pub use progress::{JobProgress, ManifestProgress, ProgressUpdate};
pub use state::JobStatus;
