//! Feed monitoring: poll channel feeds, match items against terms, and
//! schedule archive jobs for new matches.

pub mod matcher;
pub mod rate_limiter;
pub mod service;
pub mod source;

pub use matcher::{ItemMatch, get_pattern_matches, match_entries, match_item};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use service::{FeedMonitor, FeedMonitorConfig, PollReport};
pub use source::{FeedSource, YouTubeFeedSource};
