//! Discord webhook sink.
//!
//! Retries 429 responses after the delay Discord asks for.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use super::NotificationSink;
use crate::notification::message::Notification;
use crate::{Error, Result};

const DISCORD_API_BASE: &str = "https://discord.com/api/webhooks";

/// Maximum number of attempts for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

const EMBED_COLOR: u32 = 0x3498db;

pub struct DiscordSink {
    webhook_id: String,
    webhook_token: String,
    api_base: String,
    client: Client,
}

impl DiscordSink {
    pub fn new(webhook_id: String, webhook_token: String, client: Client) -> Self {
        Self {
            webhook_id,
            webhook_token,
            api_base: DISCORD_API_BASE.to_string(),
            client,
        }
    }

    fn webhook_url(&self) -> String {
        format!("{}/{}/{}", self.api_base, self.webhook_id, self.webhook_token)
    }

    fn build_payload(notification: &Notification) -> serde_json::Value {
        let tags: Vec<&str> = notification.tags.iter().map(String::as_str).collect();
        json!({
            "embeds": [{
                "title": notification.title,
                "description": notification.body,
                "color": EMBED_COLOR,
                "timestamp": notification.timestamp.to_rfc3339(),
                "footer": { "text": tags.join(", ") }
            }]
        })
    }

    async fn send_with_retry(&self, payload: &serde_json::Value) -> Result<()> {
        let url = self.webhook_url();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(&url)
                .json(payload)
                .send()
                .await
                .map_err(|e| Error::sink_delivery(self.display_address(), e))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let retry_after = parse_retry_after(&response);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Discord rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::sink_delivery(
                        self.display_address(),
                        format!("rate limited after {} attempts", MAX_RATE_LIMIT_RETRIES),
                    ));
                }

                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Discord rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::sink_delivery(
                self.display_address(),
                format!("{} - {}", status, body),
            ));
        }
    }
}

/// Delay requested by a 429 response, from `Retry-After` or
/// `X-RateLimit-Reset-After`.
fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .iter()
        .filter_map(|name| response.headers().get(*name))
        .filter_map(|value| value.to_str().ok()?.parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl NotificationSink for DiscordSink {
    fn sink_type(&self) -> &'static str {
        "discord"
    }

    fn display_address(&self) -> String {
        format!("discord://{}/***", self.webhook_id)
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let payload = Self::build_payload(notification);
        self.send_with_retry(&payload).await?;
        debug!("Discord notification sent: {}", notification.event_type);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_build_payload() {
        let notification = Notification {
            tags: ["status:finished".to_string()].into_iter().collect(),
            title: "Archive status: Finished".into(),
            body: "Karaoke from Singer @ https://youtu.be/dQw4w9WgXcQ".into(),
            event_type: "job_status_changed",
            timestamp: Utc::now(),
        };
        let payload = DiscordSink::build_payload(&notification);
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Archive status: Finished");
        assert_eq!(embed["footer"]["text"], "status:finished");
    }

    #[test]
    fn test_address_hides_token() {
        youtube_feeds::install_rustls_provider();
        let sink = DiscordSink::new("1234".into(), "secret".into(), Client::new());
        assert!(!sink.display_address().contains("secret"));
        assert!(sink.webhook_url().ends_with("/1234/secret"));
    }
}
