//! File-based configuration.
//!
//! Loaded once at startup from a TOML file whose path comes from
//! `STREAMVAULT_CONFIG` (default `config.toml`). A missing file means defaults.

mod types;

pub use types::{
    ChannelConfig, DownloaderConfig, FeedsConfig, HealthcheckConfig, NotificationConfig,
    VALID_RESOLUTIONS,
};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::ChannelSubscription;
use crate::notification::channels::parse_sink_address;
use crate::{Error, Result};

pub const CONFIG_PATH_ENV: &str = "STREAMVAULT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Tracing filter directive; `RUST_LOG` takes precedence.
    pub log_filter: Option<String>,
    pub log_dir: PathBuf,
    pub database_url: String,
    pub downloader: DownloaderConfig,
    pub feeds: FeedsConfig,
    pub healthchecks: HealthcheckConfig,
    pub notifications: Vec<NotificationConfig>,
    pub channels: Vec<ChannelConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            log_dir: PathBuf::from("logs"),
            database_url: "sqlite:streamvault.db?mode=rwc".to_string(),
            downloader: DownloaderConfig::default(),
            feeds: FeedsConfig::default(),
            healthchecks: HealthcheckConfig::default(),
            notifications: Vec::new(),
            channels: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Path from `STREAMVAULT_CONFIG`, or `config.toml`.
    pub fn path_from_env() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "No configuration file, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!(
            path = %path.display(),
            channels = config.channels.len(),
            notifications = config.notifications.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let downloader = &self.downloader;
        if downloader.num_parallel_downloads == 0 {
            return Err(Error::config("downloader.num_parallel_downloads must be at least 1"));
        }
        if downloader.max_concurrent_jobs == Some(0) {
            return Err(Error::config("downloader.max_concurrent_jobs must be at least 1"));
        }
        if downloader.command.trim().is_empty() {
            return Err(Error::config("downloader.command must not be empty"));
        }
        if !VALID_RESOLUTIONS.contains(&downloader.max_video_resolution) {
            let expected = VALID_RESOLUTIONS
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::config(format!(
                "Invalid resolution preset {} (expected one of {})",
                downloader.max_video_resolution, expected
            )));
        }
        if let Some(cookie_file) = &downloader.cookie_file
            && !cookie_file.exists()
        {
            return Err(Error::config(format!(
                "Cookie file {} does not exist",
                cookie_file.display()
            )));
        }

        if self.feeds.poll_interval_secs == 0 || self.feeds.max_concurrent_polls == 0 {
            return Err(Error::config(
                "feeds.poll_interval_secs and feeds.max_concurrent_polls must be positive",
            ));
        }
        if self.healthchecks.enable_scheduled && self.healthchecks.interval_secs == 0 {
            return Err(Error::config("healthchecks.interval_secs must be positive"));
        }

        let mut seen = HashSet::new();
        let duplicates: Vec<&str> = self
            .channels
            .iter()
            .filter(|c| !seen.insert(c.id.as_str()))
            .map(|c| c.id.as_str())
            .collect();
        if !duplicates.is_empty() {
            return Err(Error::config(format!(
                "Duplicate channels in config: {}",
                duplicates.join(", ")
            )));
        }
        self.subscriptions()?;

        for notification in &self.notifications {
            parse_sink_address(&notification.url)?;
        }
        Ok(())
    }

    /// Compiled channel subscriptions.
    pub fn subscriptions(&self) -> Result<Vec<ChannelSubscription>> {
        self.channels.iter().map(ChannelConfig::to_subscription).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
log_filter = "streamvault=debug"

[downloader]
num_parallel_downloads = 4
max_concurrent_jobs = 2
max_video_resolution = 1080

[downloader.retry]
max_retries = 5

[healthchecks]
enable_scheduled = true

[[notifications]]
url = "discord://1234/abcd"
tags = ["status:finished", "monitor-feed:found"]

[[channels]]
id = "UCxxxxxxxxxxxxxxxxxxxxxx"
name = "Someone"
num_desc_lookbehind = 3

[channels.terms]
karaoke = '(?i)(\W|^)karaoke'
unarchived = '(?i)(\W|^)unar?chived?'
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.log_filter.as_deref(), Some("streamvault=debug"));
        assert_eq!(config.downloader.num_parallel_downloads, 4);
        assert_eq!(config.downloader.max_concurrent_jobs, Some(2));
        assert_eq!(config.downloader.retry.max_retries, 5);
        assert_eq!(config.downloader.command, "moonarchive");
        assert!(config.healthchecks.enable_scheduled);
        assert_eq!(config.healthchecks.interval_secs, 1800);
        assert_eq!(config.feeds.poll_interval_secs, 600);
        assert_eq!(config.notifications[0].tags.len(), 2);

        let subs = config.subscriptions().unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].terms.len(), 2);
        assert_eq!(subs[0].num_desc_lookbehind, 3);
        assert!(!subs[0].include_non_live_content);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.downloader.num_parallel_downloads, 1);
        assert_eq!(config.downloader.max_concurrent_jobs, None);
        assert_eq!(config.downloader.cancel_grace_secs, 30);
        assert!(!config.healthchecks.enable_scheduled);
        assert!(config.channels.is_empty());
    }

    #[test]
    fn test_rejects_duplicate_channels() {
        let text = r#"
[[channels]]
id = "UCaaaa"
[[channels]]
id = "UCaaaa"
"#;
        let err = AppConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("Duplicate channels"));
    }

    #[test]
    fn test_rejects_bad_channel_id_and_pattern() {
        assert!(AppConfig::from_toml_str("[[channels]]\nid = \"xyz\"").is_err());
        let text = "[[channels]]\nid = \"UCaaaa\"\n[channels.terms]\nbad = '(unclosed'";
        let err = AppConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(AppConfig::from_toml_str("[downloader]\nnum_parallel_downloads = 0").is_err());
        assert!(AppConfig::from_toml_str("[downloader]\nmax_video_resolution = 1000").is_err());
        assert!(AppConfig::from_toml_str("[downloader]\ncookie_file = \"/nonexistent/cookies.txt\"").is_err());
        assert!(AppConfig::from_toml_str("[[notifications]]\nurl = \"ftp://nope\"").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.feeds.max_concurrent_polls, 3);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.channels[0].name.as_deref(), Some("Someone"));
    }
}
