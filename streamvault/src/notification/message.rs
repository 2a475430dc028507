//! Rendering events into notification text.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::events::ArchiveEvent;

/// What a sink receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub tags: BTreeSet<String>,
    pub title: String,
    pub body: String,
    pub event_type: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub fn content_url(content_id: &str) -> String {
    youtube_feeds::content_id::content_url(content_id)
}

/// Render an event, or `None` for events that are never sent (progress).
pub fn render(event: &ArchiveEvent) -> Option<Notification> {
    let (title, body, timestamp) = match event {
        ArchiveEvent::JobStatusChanged {
            content_id,
            title,
            author,
            to,
            timestamp,
            ..
        } => (
            format!("Archive status: {}", to.display_name()),
            format!(
                "{} from {} @ {}",
                title.as_deref().unwrap_or(content_id),
                author.as_deref().unwrap_or("unknown author"),
                content_url(content_id)
            ),
            *timestamp,
        ),
        ArchiveEvent::FeedMatchFound {
            display_name,
            content_id,
            terms,
            timestamp,
            ..
        } => (
            "Stream found".to_string(),
            format!(
                "{} is doing a stream matching: {} @ {}",
                display_name,
                terms.join(", "),
                content_url(content_id)
            ),
            *timestamp,
        ),
        ArchiveEvent::FeedPollFailed {
            channel_id,
            message,
            timestamp,
        } => (
            "Feed poll failed".to_string(),
            format!("Could not fetch the feed for {}: {}", channel_id, message),
            *timestamp,
        ),
        ArchiveEvent::JobCreated {
            content_id,
            title,
            timestamp,
            ..
        } => (
            "Archive job created".to_string(),
            format!(
                "{} @ {}",
                title.as_deref().unwrap_or(content_id),
                content_url(content_id)
            ),
            *timestamp,
        ),
        ArchiveEvent::JobLog { job_id, entry } => (
            format!("Job {}", job_id),
            entry.text.clone(),
            entry.timestamp,
        ),
        ArchiveEvent::JobDeleted { job_id, timestamp } => (
            "Archive job deleted".to_string(),
            format!("Job {} was deleted", job_id),
            *timestamp,
        ),
        ArchiveEvent::HealthChecked {
            job_id,
            result,
            timestamp,
        } => (
            "Health check".to_string(),
            format!("Job {}: {}", job_id, result),
            *timestamp,
        ),
        ArchiveEvent::JobProgress { .. } => return None,
    };

    Some(Notification {
        tags: event.tags().into_iter().collect(),
        title,
        body,
        event_type: event.event_type(),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobStatus;

    #[test]
    fn test_status_message() {
        let event = ArchiveEvent::JobStatusChanged {
            job_id: "j1".into(),
            content_id: "dQw4w9WgXcQ".into(),
            title: Some("Karaoke Night".into()),
            author: Some("Singer".into()),
            from: JobStatus::Muxing,
            to: JobStatus::Finished,
            timestamp: Utc::now(),
        };
        let message = render(&event).unwrap();
        assert_eq!(message.title, "Archive status: Finished");
        assert_eq!(
            message.body,
            "Karaoke Night from Singer @ https://youtu.be/dQw4w9WgXcQ"
        );
        assert!(message.tags.contains("status:finished"));
    }

    #[test]
    fn test_feed_match_message() {
        let event = ArchiveEvent::FeedMatchFound {
            channel_id: "UCxxxxxxxxxxxxxxxxxxxxxx".into(),
            display_name: "Singer".into(),
            content_id: "dQw4w9WgXcQ".into(),
            terms: vec!["karaoke".into(), "unarchived".into()],
            job_id: None,
            timestamp: Utc::now(),
        };
        let message = render(&event).unwrap();
        assert_eq!(
            message.body,
            "Singer is doing a stream matching: karaoke, unarchived @ https://youtu.be/dQw4w9WgXcQ"
        );
        assert!(message.tags.contains("monitor-feed:found"));
    }
}
