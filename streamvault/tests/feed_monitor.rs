mod common;

use std::sync::Arc;

use common::{FakeDownloader, FakeFeedSource, Harness, entry, live};
use streamvault::domain::{ChannelSubscription, JobSpec, JobStatus, Term};
use streamvault::downloader::{DownloadEvent, TerminalResult};
use streamvault::events::ArchiveEvent;
use youtube_feeds::{Availability, AvailabilityState};

const CHANNEL: &str = "UCxxxxxxxxxxxxxxxxxxxxxx";

fn karaoke_channel(channel_id: &str) -> ChannelSubscription {
    ChannelSubscription::new(channel_id)
        .with_display_name("Singer")
        .with_term(Term::new("karaoke", r"(?i)(\W|^)karaoke").unwrap())
}

fn success() -> FakeDownloader {
    FakeDownloader::finishing(vec![DownloadEvent::Finished(TerminalResult::Success {
        output: None,
    })])
}

#[tokio::test]
async fn test_matching_item_creates_one_job() {
    let harness = Harness::new(success());
    let source = Arc::new(FakeFeedSource::default());
    source.set(
        CHANNEL,
        vec![
            entry("aaaaaaaaaaa", "【KARAOKE】 singing!", ""),
            entry("bbbbbbbbbbb", "Just chatting", ""),
        ],
    );
    let monitor = harness.monitor(vec![karaoke_channel(CHANNEL)], source);
    let mut events = harness.registry.events().subscribe();

    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.matched, 1);
    assert_eq!(report.created.len(), 1);
    assert!(monitor.has_seen(CHANNEL, "aaaaaaaaaaa"));
    assert!(monitor.has_seen(CHANNEL, "bbbbbbbbbbb"));

    let job_id = &report.created[0];
    let job = harness.registry.get(job_id).await.unwrap();
    assert_eq!(job.spec.content_id, "aaaaaaaaaaa");
    assert!(
        job.log
            .iter()
            .any(|l| l.text == "Found stream with matching terms: karaoke")
    );
    assert_eq!(
        harness.wait_for_status(job_id, JobStatus::Finished).await,
        JobStatus::Finished
    );

    let mut saw_match = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(std::time::Duration::from_millis(50), events.recv()).await
    {
        if let ArchiveEvent::FeedMatchFound { terms, .. } = event {
            assert_eq!(terms, vec!["karaoke".to_string()]);
            saw_match = true;
        }
    }
    assert!(saw_match);

    // The listing is unchanged, so nothing new is scheduled.
    let again = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(again.fresh, 0);
    assert!(again.created.is_empty());
    assert_eq!(harness.registry.len(), 1);
}

#[tokio::test]
async fn test_channel_without_terms_matches_nothing() {
    let harness = Harness::new(success());
    let source = Arc::new(FakeFeedSource::default());
    source.set(CHANNEL, vec![entry("aaaaaaaaaaa", "KARAOKE", "karaoke")]);
    let monitor = harness.monitor(vec![ChannelSubscription::new(CHANNEL)], source);

    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(report.matched, 0);
    assert!(harness.registry.is_empty());
    assert!(monitor.has_seen(CHANNEL, "aaaaaaaaaaa"));
}

#[tokio::test]
async fn test_same_item_on_two_channels_is_enqueued_once() {
    let harness = Harness::new(FakeDownloader::holding(Vec::new()));
    let other = "UCyyyyyyyyyyyyyyyyyyyyyy";
    let source = Arc::new(FakeFeedSource::default());
    source.set(CHANNEL, vec![entry("aaaaaaaaaaa", "karaoke collab", "")]);
    source.set(other, vec![entry("aaaaaaaaaaa", "karaoke collab", "")]);
    let monitor = harness.monitor(
        vec![karaoke_channel(CHANNEL), karaoke_channel(other)],
        source,
    );

    let reports = monitor.poll_all().await;
    let created: usize = reports
        .values()
        .map(|r| r.as_ref().unwrap().created.len())
        .sum();
    assert_eq!(created, 1);
    assert_eq!(harness.registry.len(), 1);
    assert!(monitor.has_seen(CHANNEL, "aaaaaaaaaaa"));
    assert!(monitor.has_seen(other, "aaaaaaaaaaa"));

    for job in harness.registry.list().await {
        harness.registry.request_cancel(&job.id).await.unwrap();
    }
    harness.runner.wait().await;
}

#[tokio::test]
async fn test_undecided_availability_is_rechecked() {
    let harness = Harness::new(success());
    harness.downloader.set_probe(
        "aaaaaaaaaaa",
        Ok(Availability::unavailable("aaaaaaaaaaa", "Private video")),
    );
    harness.downloader.set_probe(
        "ccccccccccc",
        Err(streamvault::Error::UpstreamUnavailable("timeout".into())),
    );
    let source = Arc::new(FakeFeedSource::default());
    source.set(
        CHANNEL,
        vec![
            entry("aaaaaaaaaaa", "karaoke", ""),
            entry("ccccccccccc", "karaoke again", ""),
        ],
    );
    let monitor = harness.monitor(vec![karaoke_channel(CHANNEL)], source);

    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(report.matched, 2);
    assert_eq!(report.deferred, 2);
    assert!(!monitor.has_seen(CHANNEL, "aaaaaaaaaaa"));
    assert!(!monitor.has_seen(CHANNEL, "ccccccccccc"));

    // Once the item goes live the next poll picks it up.
    harness
        .downloader
        .set_probe("aaaaaaaaaaa", Ok(live("aaaaaaaaaaa")));
    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(report.created.len(), 1);
    assert!(monitor.has_seen(CHANNEL, "aaaaaaaaaaa"));
}

#[tokio::test]
async fn test_regular_upload_is_skipped_without_job() {
    let harness = Harness::new(success());
    let mut upload = live("aaaaaaaaaaa");
    upload.state = AvailabilityState::Ended;
    harness.downloader.set_probe("aaaaaaaaaaa", Ok(upload));
    let source = Arc::new(FakeFeedSource::default());
    source.set(CHANNEL, vec![entry("aaaaaaaaaaa", "karaoke VOD", "")]);
    let monitor = harness.monitor(vec![karaoke_channel(CHANNEL)], source);

    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(report.matched, 1);
    assert!(report.created.is_empty());
    assert!(monitor.has_seen(CHANNEL, "aaaaaaaaaaa"));
    assert!(harness.registry.is_empty());
}

#[tokio::test]
async fn test_failed_fetch_leaves_seen_set_untouched() {
    let harness = Harness::new(success());
    let source = Arc::new(FakeFeedSource::default());
    source.set(CHANNEL, vec![entry("bbbbbbbbbbb", "chatting", "")]);
    let monitor = harness.monitor(vec![karaoke_channel(CHANNEL)], source.clone());
    monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(monitor.seen_count(CHANNEL), 1);

    let mut events = harness.registry.events().subscribe();
    source.remove(CHANNEL);
    let err = monitor.poll_channel(CHANNEL).await.unwrap_err();
    assert!(matches!(err, streamvault::Error::FeedFetch { .. }));
    assert_eq!(monitor.seen_count(CHANNEL), 1);

    let event = events.recv().await.unwrap();
    assert!(matches!(event, ArchiveEvent::FeedPollFailed { .. }));
}

#[tokio::test]
async fn test_lookbehind_removes_boilerplate_lines() {
    let harness = Harness::new(success());
    let boilerplate = "Membership: join for karaoke perks";
    let source = Arc::new(FakeFeedSource::default());
    source.set(
        CHANNEL,
        vec![
            entry("ccccccccccc", "Special", &format!("{}
karaoke relay tonight", boilerplate)),
            entry("aaaaaaaaaaa", "Zatsudan", &format!("{}
chat stream", boilerplate)),
            entry("bbbbbbbbbbb", "Gaming", &format!("{}
playing", boilerplate)),
        ],
    );
    let monitor = harness.monitor(vec![karaoke_channel(CHANNEL).with_lookbehind(1)], source);

    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    // Only text unique to an item counts. The oldest item has nothing to
    // compare against, so its description is not used at all.
    assert_eq!(report.matched, 1);
    let jobs = harness.registry.list().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].spec.content_id, "ccccccccccc");
    assert!(monitor.has_seen(CHANNEL, "bbbbbbbbbbb"));
}

#[tokio::test]
async fn test_oldest_item_with_only_boilerplate_is_not_captured() {
    let harness = Harness::new(success());
    let source = Arc::new(FakeFeedSource::default());
    source.set(
        CHANNEL,
        vec![entry("bbbbbbbbbbb", "Gaming", "Membership: join for karaoke perks")],
    );
    let monitor = harness.monitor(vec![karaoke_channel(CHANNEL)], source);

    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(report.matched, 0);
    assert!(harness.registry.is_empty());
    assert_eq!(harness.downloader.start_count(), 0);
}

#[tokio::test]
async fn test_finished_capture_is_not_repeated_after_restart() {
    let harness = Harness::new(success());
    let done = harness
        .registry
        .create(JobSpec::new("aaaaaaaaaaa"))
        .await
        .unwrap();
    harness
        .registry
        .finish(&done.id, JobStatus::Finished, None)
        .await
        .unwrap();

    // The archived stream still reports as live content, now ended.
    let mut ended = live("aaaaaaaaaaa");
    ended.state = AvailabilityState::PostLive;
    harness.downloader.set_probe("aaaaaaaaaaa", Ok(ended));

    // A fresh monitor starts with an empty seen set.
    let source = Arc::new(FakeFeedSource::default());
    source.set(
        CHANNEL,
        vec![
            entry("aaaaaaaaaaa", "【KARAOKE】 singing!", ""),
            entry("bbbbbbbbbbb", "Just chatting", ""),
        ],
    );
    let monitor = harness.monitor(vec![karaoke_channel(CHANNEL)], source);

    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(report.matched, 1);
    assert!(report.created.is_empty());
    assert_eq!(harness.registry.len(), 1);
    assert_eq!(harness.downloader.start_count(), 0);
    assert!(monitor.has_seen(CHANNEL, "aaaaaaaaaaa"));
}

#[tokio::test]
async fn test_unavailable_capture_may_be_retried() {
    let harness = Harness::new(success());
    let gone = harness
        .registry
        .create(JobSpec::new("aaaaaaaaaaa"))
        .await
        .unwrap();
    harness
        .registry
        .finish(&gone.id, JobStatus::Unavailable, None)
        .await
        .unwrap();

    let source = Arc::new(FakeFeedSource::default());
    source.set(
        CHANNEL,
        vec![
            entry("aaaaaaaaaaa", "karaoke again", ""),
            entry("bbbbbbbbbbb", "Just chatting", ""),
        ],
    );
    let monitor = harness.monitor(vec![karaoke_channel(CHANNEL)], source);

    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(report.created.len(), 1);
    assert_eq!(harness.registry.len(), 2);
    assert_eq!(
        harness.wait_for_status(&report.created[0], JobStatus::Finished).await,
        JobStatus::Finished
    );
}

#[tokio::test]
async fn test_karaoke_night_scenario() {
    let harness = Harness::new(success());
    let source = Arc::new(FakeFeedSource::default());
    source.set(
        CHANNEL,
        vec![entry("v1", "Karaoke Night", ""), entry("v2", "Q&A", "")],
    );
    let channel = ChannelSubscription::new(CHANNEL)
        .with_term(Term::new("karaoke", "(?i)karaoke").unwrap());
    let monitor = harness.monitor(vec![channel], source);

    let report = monitor.poll_channel(CHANNEL).await.unwrap();
    assert_eq!(report.created.len(), 1);
    let jobs = harness.registry.list().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].spec.content_id, "v1");
    assert!(monitor.has_seen(CHANNEL, "v2"));
}
