//! The feed monitor: one polling loop per subscribed channel.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use youtube_feeds::{AvailabilityState, FeedEntry};

use super::matcher::match_entries;
use super::rate_limiter::{RateLimiter, RateLimiterConfig};
use super::source::FeedSource;
use crate::config::FeedsConfig;
use crate::domain::{ChannelSubscription, JobSpec, SeenSet};
use crate::downloader::DownloadRunner;
use crate::events::ArchiveEvent;
use crate::registry::JobRegistry;
use crate::{Error, Result};

/// Timing and concurrency knobs for the monitor.
#[derive(Debug, Clone)]
pub struct FeedMonitorConfig {
    pub poll_interval: Duration,
    pub max_concurrent_polls: usize,
    pub seen_retention: chrono::Duration,
    /// Minimum spacing between availability probes.
    pub probe_interval: Duration,
}

impl Default for FeedMonitorConfig {
    fn default() -> Self {
        Self::from(&FeedsConfig::default())
    }
}

impl From<&FeedsConfig> for FeedMonitorConfig {
    fn from(config: &FeedsConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_concurrent_polls: config.max_concurrent_polls.max(1),
            seen_retention: chrono::Duration::days(config.seen_retention_days),
            probe_interval: Duration::from_secs(config.probe_interval_secs),
        }
    }
}

/// What a single poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Items in the feed.
    pub fetched: usize,
    /// Items evaluated for the first time.
    pub fresh: usize,
    pub matched: usize,
    /// Jobs created by this poll.
    pub created: Vec<String>,
    /// Matched items left unseen to be rechecked next poll.
    pub deferred: usize,
}

/// What became of one matched item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scheduled {
    Created(String),
    /// A non-terminal job already covers it.
    Duplicate,
    /// Cannot be captured; remember it so we stop asking.
    NotCapturable,
    /// Could not decide; look again next poll.
    Recheck,
}

struct ChannelState {
    subscription: ChannelSubscription,
    seen: Mutex<SeenSet>,
}

pub struct FeedMonitor {
    channels: Vec<Arc<ChannelState>>,
    source: Arc<dyn FeedSource>,
    registry: Arc<JobRegistry>,
    runner: Arc<DownloadRunner>,
    config: FeedMonitorConfig,
    polls: Semaphore,
    probe_limiter: Option<tokio::sync::Mutex<RateLimiter>>,
}

impl FeedMonitor {
    pub fn new(
        subscriptions: Vec<ChannelSubscription>,
        source: Arc<dyn FeedSource>,
        registry: Arc<JobRegistry>,
        runner: Arc<DownloadRunner>,
        config: FeedMonitorConfig,
    ) -> Result<Self> {
        // A zero interval disables probe pacing.
        let probe_limiter = if config.probe_interval.is_zero() {
            None
        } else {
            let limiter = RateLimiter::new(RateLimiterConfig::one_per(config.probe_interval)?);
            Some(tokio::sync::Mutex::new(limiter))
        };

        let channels = subscriptions
            .into_iter()
            .map(|subscription| {
                Arc::new(ChannelState {
                    subscription,
                    seen: Mutex::new(SeenSet::default()),
                })
            })
            .collect();

        Ok(Self {
            channels,
            source,
            registry,
            runner,
            polls: Semaphore::new(config.max_concurrent_polls.max(1)),
            probe_limiter,
            config,
        })
    }

    pub fn channel_ids(&self) -> Vec<&str> {
        self.channels
            .iter()
            .map(|c| c.subscription.channel_id.as_str())
            .collect()
    }

    fn channel(&self, channel_id: &str) -> Result<Arc<ChannelState>> {
        self.channels
            .iter()
            .find(|c| c.subscription.channel_id == channel_id)
            .cloned()
            .ok_or_else(|| Error::not_found("Channel", channel_id))
    }

    pub fn has_seen(&self, channel_id: &str, item_id: &str) -> bool {
        self.channel(channel_id)
            .map(|c| c.seen.lock().contains(item_id))
            .unwrap_or(false)
    }

    pub fn seen_count(&self, channel_id: &str) -> usize {
        self.channel(channel_id)
            .map(|c| c.seen.lock().len())
            .unwrap_or(0)
    }

    /// Start one polling loop per channel. The first poll runs immediately.
    pub fn start(self: &Arc<Self>, cancellation_token: CancellationToken) -> Vec<JoinHandle<()>> {
        if self.channels.is_empty() {
            warn!("No channels for monitoring; add channels with '[[channels]]' sections");
        }

        self.channels
            .iter()
            .map(|channel| {
                let monitor = Arc::clone(self);
                let channel_id = channel.subscription.channel_id.clone();
                let token = cancellation_token.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(monitor.config.poll_interval);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    info!(channel_id = %channel_id, "Feed monitor started");

                    loop {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = interval.tick() => {}
                        }
                        // Errors are reported inside; the next tick retries.
                        let _ = monitor.poll_channel(&channel_id).await;
                    }
                    debug!(channel_id = %channel_id, "Feed monitor stopped");
                })
            })
            .collect()
    }

    /// Poll every channel once, concurrently.
    pub async fn poll_all(&self) -> HashMap<String, Result<PollReport>> {
        let polls = self.channels.iter().map(|c| async move {
            let id = c.subscription.channel_id.clone();
            let report = self.poll_channel(&id).await;
            (id, report)
        });
        futures::future::join_all(polls).await.into_iter().collect()
    }

    /// Fetch one channel's feed and schedule jobs for new matching items.
    ///
    /// A failed fetch leaves the seen-set untouched.
    pub async fn poll_channel(&self, channel_id: &str) -> Result<PollReport> {
        let channel = self.channel(channel_id)?;

        let fetched = {
            let _permit = self
                .polls
                .acquire()
                .await
                .map_err(|e| Error::Other(format!("Semaphore error: {}", e)))?;
            self.source.fetch(channel_id).await
        };
        let entries = match fetched {
            Ok(entries) => entries,
            Err(e) => {
                warn!(channel_id = %channel_id, "Feed poll failed: {}", e);
                self.registry.events().publish(ArchiveEvent::FeedPollFailed {
                    channel_id: channel_id.to_string(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(match e {
                    e @ Error::FeedFetch { .. } => e,
                    other => Error::feed_fetch(channel_id, other),
                });
            }
        };

        let subscription = &channel.subscription;
        let fresh: Vec<usize> = {
            let seen = channel.seen.lock();
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.item_id.is_empty() && !seen.contains(&e.item_id))
                .map(|(i, _)| i)
                .collect()
        };

        // Matching looks at the whole listing so lookbehind sees older items
        // that were already seen.
        let matches: HashMap<usize, BTreeSet<String>> = match_entries(
            &subscription.terms,
            subscription.num_desc_lookbehind,
            &entries,
        )
        .into_iter()
        .map(|m| (m.index, m.terms))
        .collect();

        let mut report = PollReport {
            fetched: entries.len(),
            fresh: fresh.len(),
            ..Default::default()
        };

        for index in fresh {
            let entry = &entries[index];
            let mark_seen = match matches.get(&index) {
                None => true,
                Some(terms) => {
                    report.matched += 1;
                    match self.schedule(subscription, entry, terms).await {
                        Ok(Scheduled::Created(job_id)) => {
                            report.created.push(job_id);
                            true
                        }
                        Ok(Scheduled::Duplicate | Scheduled::NotCapturable) => true,
                        Ok(Scheduled::Recheck) => {
                            report.deferred += 1;
                            false
                        }
                        Err(e) => {
                            warn!(
                                channel_id = %channel_id,
                                content_id = %entry.item_id,
                                "Failed to schedule matched item: {}",
                                e
                            );
                            report.deferred += 1;
                            false
                        }
                    }
                }
            };
            if mark_seen {
                channel.seen.lock().insert(entry.item_id.clone(), Utc::now());
            }
        }

        let present: HashSet<&str> = entries.iter().map(|e| e.item_id.as_str()).collect();
        let pruned = channel
            .seen
            .lock()
            .prune(self.config.seen_retention, Utc::now(), &present);
        if pruned > 0 {
            debug!(channel_id = %channel_id, pruned, "Pruned seen items");
        }

        debug!(
            channel_id = %channel_id,
            fetched = report.fetched,
            fresh = report.fresh,
            matched = report.matched,
            created = report.created.len(),
            "Feed poll complete"
        );
        Ok(report)
    }

    async fn schedule(
        &self,
        subscription: &ChannelSubscription,
        entry: &FeedEntry,
        terms: &BTreeSet<String>,
    ) -> Result<Scheduled> {
        let content_id = entry.item_id.as_str();
        if let Some(known) = self.registry.find_capture_by_content(content_id).await {
            debug!(content_id, job_id = %known.id, status = %known.status, "Already captured");
            return Ok(Scheduled::Duplicate);
        }

        if let Some(limiter) = &self.probe_limiter {
            limiter.lock().await.acquire().await;
        }
        let availability = match self.runner.downloader().probe(content_id).await {
            Ok(availability) => availability,
            Err(e) => {
                debug!(content_id, "Probe failed, will recheck: {}", e);
                return Ok(Scheduled::Recheck);
            }
        };

        if availability.state == AvailabilityState::Unavailable {
            debug!(
                content_id,
                "Matched item unavailable ({}), will recheck",
                availability.reason.as_deref().unwrap_or("no reason")
            );
            return Ok(Scheduled::Recheck);
        }
        if !availability.is_capturable(subscription.include_non_live_content) {
            debug!(content_id, state = %availability.state, "Matched item is not capturable");
            return Ok(Scheduled::NotCapturable);
        }

        let mut spec = JobSpec::new(content_id).with_channel(&subscription.channel_id);
        spec.title = availability.title.clone().or_else(|| Some(entry.title.clone()));
        spec.author = availability.author.clone().or_else(|| entry.author.clone());
        spec.source_url = entry.link.clone();
        spec.scheduled_start = availability.scheduled_start;
        spec.thumbnail_url = availability
            .thumbnail_url
            .clone()
            .or_else(|| entry.thumbnail.clone());
        spec.output_directory = subscription.output_directory.clone();

        let job = match self.registry.create(spec).await {
            Ok(job) => job,
            Err(e) if e.is_duplicate() => return Ok(Scheduled::Duplicate),
            Err(e) => return Err(e),
        };

        let labels: Vec<String> = terms.iter().cloned().collect();
        self.registry
            .append_log(
                &job.id,
                format!("Found stream with matching terms: {}", labels.join(", ")),
            )
            .await?;

        if let Err(e) = self.runner.spawn(&job.id).await {
            warn!(job_id = %job.id, "Failed to start execution unit: {}", e);
        }

        let display_name = subscription
            .display_name_or(job.spec.author.as_deref())
            .to_string();
        info!(
            channel_id = %subscription.channel_id,
            job_id = %job.id,
            "{} is doing a stream matching: {}",
            display_name,
            labels.join(", ")
        );
        self.registry.events().publish(ArchiveEvent::FeedMatchFound {
            channel_id: subscription.channel_id.clone(),
            display_name,
            content_id: content_id.to_string(),
            terms: labels,
            job_id: Some(job.id.clone()),
            timestamp: Utc::now(),
        });

        Ok(Scheduled::Created(job.id))
    }
}
