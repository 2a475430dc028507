//! Generic JSON webhook sink.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::NotificationSink;
use crate::notification::message::Notification;
use crate::{Error, Result};

/// POSTs each notification as a JSON document.
pub struct WebhookSink {
    url: Url,
    client: Client,
}

impl WebhookSink {
    pub fn new(url: Url, client: Client) -> Self {
        Self { url, client }
    }

    fn build_payload(notification: &Notification) -> serde_json::Value {
        json!({
            "type": notification.event_type,
            "title": notification.title,
            "body": notification.body,
            "tags": notification.tags,
            "timestamp": notification.timestamp.to_rfc3339(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn sink_type(&self) -> &'static str {
        "webhook"
    }

    fn display_address(&self) -> String {
        let mut url = self.url.clone();
        let _ = url.set_password(None);
        url.set_query(None);
        url.to_string()
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&Self::build_payload(notification))
            .send()
            .await
            .map_err(|e| Error::sink_delivery(self.display_address(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::sink_delivery(
                self.display_address(),
                format!("{} - {}", status, body),
            ));
        }

        debug!("Webhook notification sent: {}", notification.event_type);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_payload_and_redacted_address() {
        youtube_feeds::install_rustls_provider();
        let sink = WebhookSink::new(
            Url::parse("https://user:pw@example.com/hook?token=abc").unwrap(),
            Client::new(),
        );
        assert_eq!(sink.display_address(), "https://user@example.com/hook");

        let notification = Notification {
            tags: ["monitor-feed:found".to_string()].into_iter().collect(),
            title: "Stream found".into(),
            body: "body".into(),
            event_type: "feed_match_found",
            timestamp: Utc::now(),
        };
        let payload = WebhookSink::build_payload(&notification);
        assert_eq!(payload["tags"][0], "monitor-feed:found");
        assert_eq!(payload["type"], "feed_match_found");
    }
}
