//! Job entity.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::progress::{JobProgress, ManifestProgress, ProgressUpdate};
use super::state::JobStatus;

/// What to capture. Produced by the feed monitor or an explicit enqueue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub content_id: String,
    pub channel_id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub source_url: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    /// Overrides the downloader's default output directory.
    pub output_directory: Option<PathBuf>,
}

impl JobSpec {
    pub fn new(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(dir.into());
        self
    }

    /// The URL handed to the downloader.
    pub fn url(&self) -> String {
        self.source_url
            .clone()
            .unwrap_or_else(|| youtube_feeds::content_id::content_url(&self.content_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Outcome of the most recent upstream probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub result: String,
    pub last_checked_at: DateTime<Utc>,
}

/// One tracked capture of a single piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(flatten)]
    pub spec: JobSpec,
    pub status: JobStatus,
    #[serde(default)]
    pub manifests: HashMap<String, ManifestProgress>,
    pub current_manifest: Option<String>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    pub healthcheck: Option<HealthCheck>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            spec,
            status: JobStatus::Waiting,
            manifests: HashMap::new(),
            current_manifest: None,
            log: Vec::new(),
            healthcheck: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn content_id(&self) -> &str {
        &self.spec.content_id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Appends a log line. Timestamps never go backwards even if the wall
    /// clock does.
    pub fn append_log(&mut self, text: impl Into<String>, now: DateTime<Utc>) -> LogEntry {
        let timestamp = match self.log.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let entry = LogEntry {
            timestamp,
            text: text.into(),
        };
        self.log.push(entry.clone());
        self.updated_at = timestamp;
        entry
    }

    pub fn record_progress(&mut self, update: &ProgressUpdate, now: Instant) {
        self.manifests
            .entry(update.manifest_id.clone())
            .or_default()
            .apply(update, now);
        self.current_manifest = Some(update.manifest_id.clone());
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress::aggregate(&self.manifests)
    }

    /// The slowest manifest's remaining time, if every manifest can estimate one.
    pub fn eta(&self) -> Option<Duration> {
        self.manifests
            .values()
            .map(ManifestProgress::eta)
            .try_fold(Duration::ZERO, |acc, eta| eta.map(|eta| acc.max(eta)))
            .filter(|_| !self.manifests.is_empty())
    }

    pub fn display_title(&self) -> &str {
        self.spec.title.as_deref().unwrap_or(&self.spec.content_id)
    }
}
