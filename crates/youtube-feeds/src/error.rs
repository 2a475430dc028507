use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid content id: {0}")]
    InvalidContentId(String),
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },
    #[error("xml error: {0}")]
    XmlError(String),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("player response did not describe {0}")]
    MismatchedResponse(String),
    #[error("other: {0}")]
    Other(String),
}

impl From<quick_xml::Error> for FeedError {
    fn from(err: quick_xml::Error) -> Self {
        Self::XmlError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
