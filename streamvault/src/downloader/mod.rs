//! Driving the external downloader: the [`Downloader`] seam, its
//! process-backed implementation, and the per-job [`DownloadRunner`].

pub mod credentials;
pub mod engine;
pub mod resilience;
pub mod runner;

pub use credentials::{CredentialSource, Credentials};
pub use engine::{
    CommandDownloader, DownloadEvent, DownloadHandle, DownloadRequest, Downloader, TerminalResult,
};
pub use resilience::RetryConfig;
pub use runner::{DownloadRunner, RunnerSettings};
