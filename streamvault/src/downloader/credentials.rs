//! Opaque credential material passed to the downloader.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::{Error, Result};

/// Credentials resolved for one job execution.
#[derive(Clone, Default)]
pub struct Credentials {
    pub po_token: Option<String>,
    pub visitor_data: Option<String>,
    /// Netscape-format cookie jar contents.
    pub cookies: Option<Arc<str>>,
    /// Where the cookies came from, for downloaders that want a path.
    pub cookie_file: Option<PathBuf>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("po_token", &self.po_token.as_ref().map(|_| "<redacted>"))
            .field("visitor_data", &self.visitor_data.as_ref().map(|_| "<redacted>"))
            .field("cookies", &self.cookies.as_ref().map(|c| c.len()))
            .field("cookie_file", &self.cookie_file)
            .finish()
    }
}

/// Where credentials come from; resolved once per job.
#[derive(Debug, Clone, Default)]
pub struct CredentialSource {
    pub po_token: Option<String>,
    pub visitor_data: Option<String>,
    pub cookie_file: Option<PathBuf>,
}

impl CredentialSource {
    /// Read the credential material. The cookie file is read synchronously;
    /// callers keep the result for the lifetime of the job.
    pub fn resolve(&self) -> Result<Credentials> {
        let cookies = match &self.cookie_file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::FatalDownload(format!(
                        "Failed to read cookie file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                debug!(path = %path.display(), bytes = text.len(), "Loaded cookie file");
                Some(Arc::from(text))
            }
            None => None,
        };

        Ok(Credentials {
            po_token: self.po_token.clone(),
            visitor_data: self.visitor_data.clone(),
            cookies,
            cookie_file: self.cookie_file.clone(),
        })
    }
}
