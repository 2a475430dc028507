//! Where feed items come from.

use async_trait::async_trait;
use youtube_feeds::{FeedClient, FeedEntry};

use crate::{Error, Result};

/// Yields a channel's current items, newest first. Every call returns the
/// full current listing.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, channel_id: &str) -> Result<Vec<FeedEntry>>;
}

/// Reads the public Atom feed of a YouTube channel.
pub struct YouTubeFeedSource {
    client: FeedClient,
}

impl YouTubeFeedSource {
    pub fn new(client: FeedClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedSource for YouTubeFeedSource {
    async fn fetch(&self, channel_id: &str) -> Result<Vec<FeedEntry>> {
        let feed = self
            .client
            .fetch(channel_id)
            .await
            .map_err(|e| Error::feed_fetch(channel_id, e))?;
        Ok(feed.entries)
    }
}
