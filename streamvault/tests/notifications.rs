mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeDownloader, Harness, RecordingSink};
use streamvault::domain::JobSpec;
use streamvault::downloader::{DownloadEvent, TerminalResult};
use streamvault::notification::{NotificationDispatcher, NotificationTarget};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_finished_only_target_gets_one_message() {
    let harness = Harness::new(FakeDownloader::finishing(vec![
        DownloadEvent::Metadata {
            title: Some("Karaoke Night".into()),
            author: Some("Singer".into()),
        },
        DownloadEvent::MuxStarted,
        DownloadEvent::Finished(TerminalResult::Success { output: None }),
    ]));
    let finished = Arc::new(RecordingSink::default());
    let everything_else = Arc::new(RecordingSink::default());
    let dispatcher = Arc::new(NotificationDispatcher::new(vec![
        NotificationTarget::new(finished.clone(), ["status:finished".to_string()]),
        NotificationTarget::new(everything_else.clone(), ["status:error".to_string()]),
    ]));
    let token = CancellationToken::new();
    let listener = dispatcher.start(harness.registry.events(), token.clone());

    let job = harness.registry.create(JobSpec::new("dQw4w9WgXcQ")).await.unwrap();
    harness.runner.spawn(&job.id).await.unwrap().await.unwrap();

    for _ in 0..100 {
        if !finished.sent.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = finished.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "Archive status: Finished");
    assert_eq!(
        sent[0].body,
        "Karaoke Night from Singer @ https://youtu.be/dQw4w9WgXcQ"
    );
    assert!(everything_else.sent.lock().is_empty());

    token.cancel();
    listener.await.unwrap();
}
