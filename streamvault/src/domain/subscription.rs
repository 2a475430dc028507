//! Channel subscriptions and their seen-item sets.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

/// A named pattern deciding whether a feed item gets scheduled.
#[derive(Debug, Clone)]
pub struct Term {
    pub label: String,
    pub pattern: Regex,
}

impl Term {
    pub fn new(label: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            label: label.into(),
            pattern: Regex::new(pattern)?,
        })
    }
}

/// A monitored channel.
#[derive(Debug, Clone)]
pub struct ChannelSubscription {
    pub channel_id: String,
    pub display_name: Option<String>,
    /// Empty means nothing matches.
    pub terms: Vec<Term>,
    pub num_desc_lookbehind: usize,
    pub include_non_live_content: bool,
    pub output_directory: Option<PathBuf>,
}

impl ChannelSubscription {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            display_name: None,
            terms: Vec::new(),
            num_desc_lookbehind: 2,
            include_non_live_content: false,
            output_directory: None,
        }
    }

    pub fn with_term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_lookbehind(mut self, n: usize) -> Self {
        self.num_desc_lookbehind = n;
        self
    }

    /// Name used in messages: configured name, then feed author, then id.
    pub fn display_name_or<'a>(&'a self, author: Option<&'a str>) -> &'a str {
        self.display_name
            .as_deref()
            .or(author)
            .unwrap_or(&self.channel_id)
    }
}

/// Item ids already evaluated for a channel, with the time first seen.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    items: HashMap<String, DateTime<Utc>>,
}

impl SeenSet {
    pub fn contains(&self, item_id: &str) -> bool {
        self.items.contains_key(item_id)
    }

    /// Marks an item seen. Re-marking keeps the original first-seen time.
    pub fn insert(&mut self, item_id: impl Into<String>, now: DateTime<Utc>) -> bool {
        let mut inserted = false;
        self.items.entry(item_id.into()).or_insert_with(|| {
            inserted = true;
            now
        });
        inserted
    }

    /// Drops ids first seen before `now - retention` that are no longer in the
    /// feed. Ids still listed are kept so they are not re-evaluated.
    pub fn prune(&mut self, retention: Duration, now: DateTime<Utc>, present: &HashSet<&str>) -> usize {
        let cutoff = now - retention;
        let before = self.items.len();
        self.items
            .retain(|id, first_seen| *first_seen >= cutoff || present.contains(id.as_str()));
        before - self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
