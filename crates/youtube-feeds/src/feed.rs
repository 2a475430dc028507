//! Channel Atom feed retrieval and parsing.
//!
//! The feed at `https://www.youtube.com/feeds/videos.xml?channel_id=<id>` lists
//! the channel's most recent uploads, including upcoming and live broadcasts,
//! newest first. Only the fields needed for matching and scheduling are kept.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FeedError, Result};

const FEED_BASE_URL: &str = "https://www.youtube.com/feeds/videos.xml";

/// One `<entry>` of a channel feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Video id (`<yt:videoId>`).
    pub item_id: String,
    pub title: String,
    /// `<media:description>`; may be empty.
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub link: Option<String>,
    pub thumbnail: Option<String>,
}

/// A parsed channel feed. Entries keep the feed's order (newest first).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFeed {
    pub channel_id: Option<String>,
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    FeedTitle,
    FeedChannelId,
    EntryId,
    EntryTitle,
    EntryPublished,
    EntryAuthorName,
    EntryDescription,
}

/// Parses the Atom document of a channel feed.
pub fn parse_feed(xml: &str) -> Result<ChannelFeed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ChannelFeed::default();
    let mut current: Option<FeedEntry> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let name = start.local_name();
                match name.as_ref() {
                    b"entry" => current = Some(FeedEntry::default()),
                    b"author" => in_author = true,
                    b"link" => {
                        if let Some(entry) = current.as_mut() {
                            read_link(&start, entry)?;
                        }
                    }
                    b"thumbnail" => {
                        if let Some(entry) = current.as_mut() {
                            entry.thumbnail = attribute(&start, b"url")?;
                        }
                    }
                    other => {
                        field = classify(other, current.is_some(), in_author);
                        text.clear();
                    }
                }
            }
            Event::Empty(start) => {
                let name = start.local_name();
                if let Some(entry) = current.as_mut() {
                    match name.as_ref() {
                        b"link" => read_link(&start, entry)?,
                        b"thumbnail" => entry.thumbnail = attribute(&start, b"url")?,
                        _ => {}
                    }
                }
            }
            Event::Text(t) => {
                if field.is_some() {
                    let unescaped = t.unescape()?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(c) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(end) => {
                let name = end.local_name();
                match name.as_ref() {
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            if entry.item_id.is_empty() {
                                debug!(title = %entry.title, "Skipping feed entry without a video id");
                            } else {
                                feed.entries.push(entry);
                            }
                        }
                    }
                    b"author" => in_author = false,
                    _ => {
                        if let Some(f) = field.take() {
                            apply(&mut feed, current.as_mut(), f, std::mem::take(&mut text));
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(feed)
}

fn classify(name: &[u8], in_entry: bool, in_author: bool) -> Option<Field> {
    match (name, in_entry, in_author) {
        (b"title", false, false) => Some(Field::FeedTitle),
        (b"channelId", false, _) => Some(Field::FeedChannelId),
        (b"videoId", true, _) => Some(Field::EntryId),
        // <media:title> shares the local name; the first title wins.
        (b"title", true, false) => Some(Field::EntryTitle),
        (b"published", true, _) => Some(Field::EntryPublished),
        (b"name", true, true) => Some(Field::EntryAuthorName),
        (b"description", true, _) => Some(Field::EntryDescription),
        _ => None,
    }
}

fn apply(feed: &mut ChannelFeed, entry: Option<&mut FeedEntry>, field: Field, value: String) {
    match (field, entry) {
        (Field::FeedTitle, _) => feed.title = Some(value),
        (Field::FeedChannelId, _) => feed.channel_id = Some(value),
        (Field::EntryId, Some(entry)) => entry.item_id = value,
        (Field::EntryTitle, Some(entry)) => {
            if entry.title.is_empty() {
                entry.title = value;
            }
        }
        (Field::EntryPublished, Some(entry)) => {
            entry.published_at = DateTime::parse_from_rfc3339(&value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
        (Field::EntryAuthorName, Some(entry)) => entry.author = Some(value),
        (Field::EntryDescription, Some(entry)) => entry.description = value,
        _ => {}
    }
}

fn read_link(start: &BytesStart<'_>, entry: &mut FeedEntry) -> Result<()> {
    let rel = attribute(start, b"rel")?;
    if rel.as_deref().is_none_or(|rel| rel == "alternate") {
        entry.link = attribute(start, b"href")?;
    }
    Ok(())
}

fn attribute(start: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    let attr = start
        .try_get_attribute(key)
        .map_err(|e| FeedError::XmlError(e.to_string()))?;
    match attr {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Fetches channel feeds over HTTP.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: Client,
    base_url: String,
}

impl FeedClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: FEED_BASE_URL.to_string(),
        }
    }

    /// Overrides the feed endpoint, e.g. to point at a local mirror.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn feed_url(&self, channel_id: &str) -> String {
        format!("{}?channel_id={}", self.base_url, channel_id)
    }

    /// Retrieves and parses the current feed for `channel_id`.
    pub async fn fetch(&self, channel_id: &str) -> Result<ChannelFeed> {
        let url = self.feed_url(channel_id);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }
        let body = response.text().await?;
        let feed = parse_feed(&body)?;
        debug!(channel_id, entries = feed.entries.len(), "Fetched channel feed");
        Ok(feed)
    }
}
