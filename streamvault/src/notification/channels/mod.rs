//! Notification sinks.
//!
//! A sink is built from an address URL:
//! - `http(s)://...`, `json://...`, `jsons://...`: generic JSON webhook
//! - `discord://<webhook_id>/<webhook_token>`: Discord webhook embed

mod discord;
mod webhook;

pub use discord::DiscordSink;
pub use webhook::WebhookSink;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::message::Notification;
use crate::{Error, Result};

/// An external delivery endpoint.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn sink_type(&self) -> &'static str;

    /// Printable address with secrets removed.
    fn display_address(&self) -> String;

    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// A parsed sink address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkAddress {
    Webhook { url: Url },
    Discord { webhook_id: String, webhook_token: String },
}

/// Parse a sink address URL.
pub fn parse_sink_address(address: &str) -> Result<SinkAddress> {
    let url = Url::parse(address.trim())
        .map_err(|e| Error::config(format!("Invalid notification url '{}': {}", address, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(SinkAddress::Webhook { url }),
        "json" | "jsons" => {
            let scheme = if url.scheme() == "jsons" { "https" } else { "http" };
            let rest = &address.trim()[url.scheme().len()..];
            let url = Url::parse(&format!("{}{}", scheme, rest)).map_err(|e| {
                Error::config(format!("Invalid notification url '{}': {}", address, e))
            })?;
            Ok(SinkAddress::Webhook { url })
        }
        "discord" => {
            let webhook_id = url.host_str().unwrap_or_default().to_string();
            let webhook_token = url.path().trim_matches('/').to_string();
            if webhook_id.is_empty() || webhook_token.is_empty() || webhook_token.contains('/') {
                return Err(Error::config(
                    "Discord notification url must look like discord://<webhook_id>/<webhook_token>",
                ));
            }
            Ok(SinkAddress::Discord {
                webhook_id,
                webhook_token,
            })
        }
        other => Err(Error::config(format!(
            "Unsupported notification scheme '{}' in '{}'",
            other, address
        ))),
    }
}

/// Build the sink for an address.
pub fn build_sink(address: SinkAddress, client: Client) -> Arc<dyn NotificationSink> {
    match address {
        SinkAddress::Webhook { url } => Arc::new(WebhookSink::new(url, client)),
        SinkAddress::Discord {
            webhook_id,
            webhook_token,
        } => Arc::new(DiscordSink::new(webhook_id, webhook_token, client)),
    }
}
