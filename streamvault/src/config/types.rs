//! Configuration sections.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{ChannelSubscription, Term};
use crate::downloader::RetryConfig;
use crate::{Error, Result};

/// Resolution presets accepted by the downloader.
pub const VALID_RESOLUTIONS: [u32; 9] = [144, 240, 360, 480, 720, 1080, 1440, 2160, 4320];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Concurrent fragment fetches per job, passed through to the downloader.
    pub num_parallel_downloads: usize,
    /// Cap on concurrently running jobs; unbounded when unset.
    pub max_concurrent_jobs: Option<usize>,
    /// Executable of the external downloader.
    pub command: String,
    pub extra_args: Vec<String>,
    pub output_directory: Option<PathBuf>,
    pub staging_directory: Option<PathBuf>,
    pub po_token: Option<String>,
    pub visitor_data: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub max_video_resolution: u32,
    pub retry: RetryConfig,
    /// How long a cancelled job waits for the downloader before aborting it.
    pub cancel_grace_secs: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            num_parallel_downloads: 1,
            max_concurrent_jobs: None,
            command: "moonarchive".to_string(),
            extra_args: Vec::new(),
            output_directory: None,
            staging_directory: None,
            po_token: None,
            visitor_data: None,
            cookie_file: None,
            max_video_resolution: 4320,
            retry: RetryConfig::default(),
            cancel_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    pub poll_interval_secs: u64,
    pub max_concurrent_polls: usize,
    pub seen_retention_days: i64,
    /// Minimum spacing between availability probes of matched items.
    pub probe_interval_secs: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 600,
            max_concurrent_polls: 3,
            seen_retention_days: 30,
            probe_interval_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthcheckConfig {
    pub enable_scheduled: bool,
    pub interval_secs: u64,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            enable_scheduled: false,
            interval_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Label to regular expression.
    #[serde(default)]
    pub terms: BTreeMap<String, String>,
    #[serde(default = "default_lookbehind")]
    pub num_desc_lookbehind: usize,
    #[serde(default)]
    pub include_non_live_content: bool,
    #[serde(default)]
    pub output_directory: Option<PathBuf>,
}

fn default_lookbehind() -> usize {
    2
}

impl ChannelConfig {
    pub fn to_subscription(&self) -> Result<ChannelSubscription> {
        if !self.id.starts_with("UC") {
            return Err(Error::config(format!(
                "Expected 'UC' prefix for channel id '{}'",
                self.id
            )));
        }

        let terms = self
            .terms
            .iter()
            .map(|(label, pattern)| {
                Term::new(label, pattern).map_err(|e| {
                    Error::config(format!(
                        "Invalid pattern for term '{}' on channel {}: {}",
                        label, self.id, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ChannelSubscription {
            channel_id: self.id.clone(),
            display_name: self.name.clone(),
            terms,
            num_desc_lookbehind: self.num_desc_lookbehind,
            include_non_live_content: self.include_non_live_content,
            output_directory: self.output_directory.clone(),
        })
    }
}
