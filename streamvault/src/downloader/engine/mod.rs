//! Downloader implementations.

pub mod command;
pub mod traits;
pub mod utils;

pub use command::CommandDownloader;
pub use traits::{DownloadEvent, DownloadHandle, DownloadRequest, Downloader, TerminalResult};
