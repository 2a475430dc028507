//! Events published by the orchestration core.

pub mod bus;

pub use bus::{EventBus, EventSubscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{JobProgress, JobStatus, LogEntry};

/// Tag carried by feed match events.
pub const TAG_FEED_MATCH: &str = "monitor-feed:found";
/// Tag carried by failed feed polls.
pub const TAG_FEED_ERROR: &str = "monitor-feed:error";
pub const TAG_JOB_CREATED: &str = "job:created";
pub const TAG_JOB_PROGRESS: &str = "job:progress";
pub const TAG_JOB_LOG: &str = "job:log";
pub const TAG_JOB_DELETED: &str = "job:deleted";
pub const TAG_HEALTHCHECK: &str = "healthcheck";

/// Tag for a status change into `status`, e.g. `status:finished`.
pub fn status_tag(status: JobStatus) -> String {
    format!("status:{}", status.as_str())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchiveEvent {
    JobCreated {
        job_id: String,
        content_id: String,
        title: Option<String>,
        timestamp: DateTime<Utc>,
    },
    JobStatusChanged {
        job_id: String,
        content_id: String,
        title: Option<String>,
        author: Option<String>,
        from: JobStatus,
        to: JobStatus,
        timestamp: DateTime<Utc>,
    },
    JobProgress {
        job_id: String,
        progress: JobProgress,
        current_manifest: Option<String>,
        eta_secs: Option<u64>,
        timestamp: DateTime<Utc>,
    },
    JobLog {
        job_id: String,
        entry: LogEntry,
    },
    JobDeleted {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
    HealthChecked {
        job_id: String,
        result: String,
        timestamp: DateTime<Utc>,
    },
    FeedMatchFound {
        channel_id: String,
        display_name: String,
        content_id: String,
        terms: Vec<String>,
        job_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    FeedPollFailed {
        channel_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ArchiveEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job_created",
            Self::JobStatusChanged { .. } => "job_status_changed",
            Self::JobProgress { .. } => "job_progress",
            Self::JobLog { .. } => "job_log",
            Self::JobDeleted { .. } => "job_deleted",
            Self::HealthChecked { .. } => "health_checked",
            Self::FeedMatchFound { .. } => "feed_match_found",
            Self::FeedPollFailed { .. } => "feed_poll_failed",
        }
    }

    /// Tags used for notification routing.
    pub fn tags(&self) -> Vec<String> {
        match self {
            Self::JobCreated { .. } => vec![TAG_JOB_CREATED.to_string()],
            Self::JobStatusChanged { to, .. } => vec![status_tag(*to)],
            Self::JobProgress { .. } => vec![TAG_JOB_PROGRESS.to_string()],
            Self::JobLog { .. } => vec![TAG_JOB_LOG.to_string()],
            Self::JobDeleted { .. } => vec![TAG_JOB_DELETED.to_string()],
            Self::HealthChecked { .. } => vec![TAG_HEALTHCHECK.to_string()],
            Self::FeedMatchFound { .. } => vec![TAG_FEED_MATCH.to_string()],
            Self::FeedPollFailed { .. } => vec![TAG_FEED_ERROR.to_string()],
        }
    }

    /// The job this event concerns, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobCreated { job_id, .. }
            | Self::JobStatusChanged { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobLog { job_id, .. }
            | Self::JobDeleted { job_id, .. }
            | Self::HealthChecked { job_id, .. } => Some(job_id),
            Self::FeedMatchFound { job_id, .. } => job_id.as_deref(),
            Self::FeedPollFailed { .. } => None,
        }
    }
}
