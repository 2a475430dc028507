//! Downloader trait and the types exchanged with a running download.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use youtube_feeds::Availability;

use crate::Result;
use crate::domain::ProgressUpdate;
use crate::downloader::credentials::Credentials;

/// Everything a downloader needs to capture one piece of content.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub job_id: String,
    pub content_id: String,
    pub url: String,
    /// Final output directory.
    pub output_directory: Option<PathBuf>,
    /// Directory for intermediate fragments.
    pub staging_directory: Option<PathBuf>,
    /// Maximum in-flight fragment fetches.
    pub parallelism: usize,
    pub max_video_resolution: u32,
    pub credentials: Credentials,
    pub extra_args: Vec<String>,
    /// Zero-based attempt number; non-zero when retrying a recoverable failure.
    pub attempt: u32,
}

/// How a download ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalResult {
    /// The muxed artifact has been written.
    Success { output: Option<PathBuf> },
    RecoverableError(String),
    FatalError(String),
    Cancelled,
}

/// Events emitted by a downloader while it runs.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Stream metadata became known.
    Metadata {
        title: Option<String>,
        author: Option<String>,
    },
    Progress(ProgressUpdate),
    /// Free-text line for the job log.
    Message(String),
    MuxStarted,
    /// Upstream content went away.
    Unavailable { reason: String },
    /// Exactly one per download; nothing follows it.
    Finished(TerminalResult),
}

/// Handle to an active download.
pub struct DownloadHandle {
    pub job_id: String,
    /// Cancellation token observed by the downloader.
    pub cancellation_token: CancellationToken,
    /// Event sender for download events.
    pub event_tx: mpsc::Sender<DownloadEvent>,
}

impl DownloadHandle {
    pub fn new(
        job_id: impl Into<String>,
        cancellation_token: CancellationToken,
        event_tx: mpsc::Sender<DownloadEvent>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            cancellation_token,
            event_tx,
        }
    }

    /// Request a cooperative stop.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Send an event; returns false once the receiving side is gone.
    pub async fn send(&self, event: DownloadEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }
}

/// The external capability that fetches and muxes content.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Start a download.
    ///
    /// Implementations spawn their work and return; progress and the terminal
    /// result arrive on the handle's event channel. Returning an error means
    /// the download never started.
    async fn start(&self, request: DownloadRequest, handle: Arc<DownloadHandle>) -> Result<()>;

    /// Check whether the content can currently be captured.
    async fn probe(&self, content_id: &str) -> Result<Availability>;
}
