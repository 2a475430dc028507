//! Content id extraction.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use url::Url;

/// Video ids are the url-safe base64 form of a 64-bit integer, always 11 characters.
const CONTENT_ID_LEN: usize = 11;

const ID_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Returns true if `candidate` decodes to exactly one 64-bit integer.
pub fn is_content_id(candidate: &str) -> bool {
    if candidate.len() != CONTENT_ID_LEN {
        return false;
    }
    matches!(ID_ENGINE.decode(candidate), Ok(bytes) if bytes.len() == 8)
}

/// Extracts a video id from a bare id or any of the common URL shapes:
/// `youtu.be/<id>`, `youtube.com/watch?v=<id>`, `youtube.com/live/<id>` and
/// `youtube.com/shorts/<id>`.
pub fn extract_content_id(url_or_id: &str) -> Option<String> {
    let input = url_or_id.trim();
    if is_content_id(input) {
        return Some(input.to_string());
    }

    let url = if input.contains("://") {
        Url::parse(input).ok()?
    } else {
        Url::parse(&format!("https://{input}")).ok()?
    };
    let host = url.host_str()?.to_ascii_lowercase();

    let candidate = if host == "youtu.be" {
        url.path_segments()?.next().map(str::to_string)
    } else if host == "youtube.com" || host.ends_with(".youtube.com") {
        let mut segments = url.path_segments()?;
        match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("live") | Some("shorts") => segments.next().map(str::to_string),
            _ => None,
        }
    } else {
        None
    };

    candidate.filter(|id| is_content_id(id))
}

/// Canonical short link for a video id.
pub fn content_url(content_id: &str) -> String {
    format!("https://youtu.be/{content_id}")
}
