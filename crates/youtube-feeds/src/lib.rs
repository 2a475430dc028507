//! Client pieces for watching YouTube channels.
//!
//! - [`feed`]: fetch and parse a channel's public Atom feed.
//! - [`content_id`]: pull an 11-character video id out of a URL or bare id.
//! - [`player`]: query the innertube player endpoint to decide whether a video
//!   is live, upcoming, or gone.

pub mod content_id;
pub mod error;
pub mod feed;
pub mod player;

pub use content_id::extract_content_id;
pub use error::{FeedError, Result};
pub use feed::{ChannelFeed, FeedClient, FeedEntry, parse_feed};
pub use player::{Availability, AvailabilityState, PlayerClient};

use std::sync::OnceLock;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0";

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            tracing::debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Builds the shared HTTP client used by [`FeedClient`] and [`PlayerClient`].
pub fn default_client() -> Result<reqwest::Client> {
    install_rustls_provider();
    reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(4)
        .build()
        .map_err(FeedError::from)
}
