//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A non-terminal job for the same content already exists.
    #[error("Duplicate job: content {content_id} is already tracked by job {existing_id}")]
    DuplicateJob {
        content_id: String,
        existing_id: String,
    },

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// The downloader failed in a way that another attempt may fix.
    #[error("Recoverable download error: {0}")]
    RecoverableDownload(String),

    #[error("Fatal download error: {0}")]
    FatalDownload(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Feed fetch error for channel {channel_id}: {message}")]
    FeedFetch { channel_id: String, message: String },

    #[error("Notification delivery to {target} failed: {message}")]
    SinkDelivery { target: String, message: String },

    /// A second execution unit was requested for a job that already has one.
    #[error("Job {0} already has a live execution unit")]
    ExecutionActive(String),

    /// The operation requires a terminal job.
    #[error("Job {0} is still active")]
    JobActive(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn feed_fetch(channel_id: impl Into<String>, message: impl ToString) -> Self {
        Self::FeedFetch {
            channel_id: channel_id.into(),
            message: message.to_string(),
        }
    }

    pub fn sink_delivery(target: impl Into<String>, message: impl ToString) -> Self {
        Self::SinkDelivery {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Whether the caller may treat the error as a benign no-op.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateJob { .. })
    }
}

impl From<youtube_feeds::FeedError> for Error {
    fn from(err: youtube_feeds::FeedError) -> Self {
        Self::Other(err.to_string())
    }
}
