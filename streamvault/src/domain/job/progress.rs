//! Per-manifest progress counters and job-level aggregation.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Throughput samples older than this are discarded.
const SAMPLE_WINDOW: Duration = Duration::from_secs(120);
const MAX_SAMPLES: usize = 64;

/// A progress report for one manifest as produced by the downloader.
///
/// Sequence numbers are absolute positions; byte counts are increments since
/// the previous report for the same manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub manifest_id: String,
    pub video_seq: Option<u64>,
    pub audio_seq: Option<u64>,
    pub max_seq: Option<u64>,
    #[serde(default)]
    pub bytes_downloaded: u64,
    #[serde(default)]
    pub bytes_muxed: u64,
}

#[derive(Debug, Clone, Copy)]
struct ProgressSample {
    at: Instant,
    position: u64,
    bytes: u64,
}

/// Counters for one manifest. All counters only move forward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestProgress {
    pub video_seq: u64,
    pub audio_seq: u64,
    pub max_seq: u64,
    pub total_downloaded: u64,
    pub total_muxed: u64,
    #[serde(skip)]
    samples: VecDeque<ProgressSample>,
}

impl ManifestProgress {
    /// Merge an update, keeping every counter non-decreasing.
    pub fn apply(&mut self, update: &ProgressUpdate, now: Instant) {
        if let Some(video_seq) = update.video_seq {
            self.video_seq = self.video_seq.max(video_seq);
        }
        if let Some(audio_seq) = update.audio_seq {
            self.audio_seq = self.audio_seq.max(audio_seq);
        }
        if let Some(max_seq) = update.max_seq {
            self.max_seq = self.max_seq.max(max_seq);
        }
        self.total_downloaded = self.total_downloaded.saturating_add(update.bytes_downloaded);
        self.total_muxed = self.total_muxed.saturating_add(update.bytes_muxed);

        self.samples.push_back(ProgressSample {
            at: now,
            position: self.position(),
            bytes: self.total_downloaded,
        });
        while self.samples.len() > MAX_SAMPLES
            || self
                .samples
                .front()
                .is_some_and(|s| now.saturating_duration_since(s.at) > SAMPLE_WINDOW)
        {
            self.samples.pop_front();
        }
    }

    /// Fragments completed on both tracks; a manifest with a single track
    /// reports that track.
    pub fn position(&self) -> u64 {
        match (self.video_seq, self.audio_seq) {
            (0, audio) => audio,
            (video, 0) => video,
            (video, audio) => video.min(audio),
        }
    }

    fn window(&self) -> Option<(ProgressSample, ProgressSample, f64)> {
        let first = *self.samples.front()?;
        let last = *self.samples.back()?;
        let elapsed = last.at.saturating_duration_since(first.at).as_secs_f64();
        (elapsed > 0.0).then_some((first, last, elapsed))
    }

    /// Recent download throughput in bytes per second.
    pub fn throughput(&self) -> Option<f64> {
        let (first, last, elapsed) = self.window()?;
        Some(last.bytes.saturating_sub(first.bytes) as f64 / elapsed)
    }

    /// Estimated time until `max_seq` is reached at the recent fragment rate.
    pub fn eta(&self) -> Option<Duration> {
        let remaining = self.max_seq.saturating_sub(self.position());
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let (first, last, elapsed) = self.window()?;
        let advanced = last.position.saturating_sub(first.position);
        if advanced == 0 {
            return None;
        }
        let rate = advanced as f64 / elapsed;
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}

/// Job-level view over all manifests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Slowest manifest's video position.
    pub video_seq: u64,
    /// Slowest manifest's audio position.
    pub audio_seq: u64,
    /// Longest advertised manifest length.
    pub max_seq: u64,
    pub total_downloaded: u64,
    pub total_muxed: u64,
}

impl JobProgress {
    pub fn aggregate(manifests: &HashMap<String, ManifestProgress>) -> Self {
        if manifests.is_empty() {
            return Self::default();
        }
        let values = || manifests.values();
        Self {
            video_seq: values().map(|m| m.video_seq).min().unwrap_or(0),
            audio_seq: values().map(|m| m.audio_seq).min().unwrap_or(0),
            max_seq: values().map(|m| m.max_seq).max().unwrap_or(0),
            total_downloaded: values().map(|m| m.total_downloaded).sum(),
            total_muxed: values().map(|m| m.total_muxed).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(manifest: &str, video: u64, audio: u64) -> ProgressUpdate {
        ProgressUpdate {
            manifest_id: manifest.to_string(),
            video_seq: Some(video),
            audio_seq: Some(audio),
            max_seq: None,
            bytes_downloaded: 100,
            bytes_muxed: 0,
        }
    }

    #[test]
    fn test_aggregate_uses_slowest_manifest() {
        let now = Instant::now();
        let mut manifests: HashMap<String, ManifestProgress> = HashMap::new();
        manifests
            .entry("m1".into())
            .or_default()
            .apply(&update("m1", 3, 2), now);
        manifests
            .entry("m2".into())
            .or_default()
            .apply(&update("m2", 1, 4), now);

        let progress = JobProgress::aggregate(&manifests);
        assert_eq!(progress.video_seq, 1);
        assert_eq!(progress.audio_seq, 2);
        assert_eq!(progress.total_downloaded, 200);
    }

    #[test]
    fn test_aggregate_max_seq_is_longest() {
        let now = Instant::now();
        let mut manifests: HashMap<String, ManifestProgress> = HashMap::new();
        for (id, max) in [("m1", 10), ("m2", 25)] {
            manifests.entry(id.into()).or_default().apply(
                &ProgressUpdate {
                    manifest_id: id.into(),
                    max_seq: Some(max),
                    ..Default::default()
                },
                now,
            );
        }
        assert_eq!(JobProgress::aggregate(&manifests).max_seq, 25);
        assert_eq!(JobProgress::aggregate(&HashMap::new()), JobProgress::default());
    }

    #[test]
    fn test_counters_never_decrease() {
        let now = Instant::now();
        let mut progress = ManifestProgress::default();
        progress.apply(&update("m1", 5, 5), now);
        progress.apply(&update("m1", 3, 7), now);
        assert_eq!(progress.video_seq, 5);
        assert_eq!(progress.audio_seq, 7);
        assert_eq!(progress.total_downloaded, 200);
    }

    #[test]
    fn test_eta_from_fragment_rate() {
        let start = Instant::now();
        let mut progress = ManifestProgress::default();
        progress.apply(
            &ProgressUpdate {
                manifest_id: "m1".into(),
                video_seq: Some(10),
                audio_seq: Some(10),
                max_seq: Some(110),
                ..Default::default()
            },
            start,
        );
        assert_eq!(progress.eta(), None);

        progress.apply(
            &ProgressUpdate {
                manifest_id: "m1".into(),
                video_seq: Some(20),
                audio_seq: Some(20),
                bytes_downloaded: 1000,
                ..Default::default()
            },
            start + Duration::from_secs(10),
        );
        // 10 fragments in 10s, 90 remaining
        assert_eq!(progress.eta().map(|d| d.as_secs()), Some(90));
        assert_eq!(progress.throughput(), Some(100.0));
    }

    #[test]
    fn test_samples_are_skipped_when_serialized() {
        let mut progress = ManifestProgress::default();
        progress.apply(&update("m1", 1, 1), Instant::now());
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["video_seq"], 1);
        assert!(json.get("samples").is_none());
    }
}
