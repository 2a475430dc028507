//! Downloader that drives an external process speaking a JSON-lines status
//! protocol on stdout.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};
use youtube_feeds::{Availability, PlayerClient};

use super::traits::{DownloadEvent, DownloadHandle, DownloadRequest, Downloader, TerminalResult};
use super::utils::{OutputRecordReader, spawn_process_waiter};
use crate::domain::ProgressUpdate;
use crate::{Error, Result};

/// One line of the downloader's status stream.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StatusLine {
    StreamInfo {
        video_title: Option<String>,
        #[serde(default)]
        author: Option<String>,
    },
    Fragment {
        manifest_id: String,
        media_type: String,
        current_fragment: u64,
        max_fragments: u64,
        #[serde(default)]
        fragment_size: u64,
    },
    FormatSelection {
        manifest_id: String,
        major_type: String,
        #[serde(default)]
        quality_label: Option<String>,
        #[serde(default)]
        codec: Option<String>,
        #[serde(default)]
        itag: Option<u32>,
        #[serde(default)]
        bitrate: Option<u64>,
    },
    StreamMux,
    StreamUnavailable {
        #[serde(default)]
        reason: Option<String>,
    },
    DownloadJobFinished {
        #[serde(default)]
        output: Option<PathBuf>,
    },
    DownloadJobFailedOutputMove {
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename = "error")]
    Failure {
        text: String,
        #[serde(default)]
        recoverable: bool,
    },
    #[serde(rename = "string")]
    Text { text: String },
}

/// Translate a status line into a download event.
fn translate(line: StatusLine) -> DownloadEvent {
    match line {
        StatusLine::StreamInfo {
            video_title,
            author,
        } => DownloadEvent::Metadata {
            title: video_title,
            author,
        },
        StatusLine::Fragment {
            manifest_id,
            media_type,
            current_fragment,
            max_fragments,
            fragment_size,
        } => {
            let mut update = ProgressUpdate {
                manifest_id,
                max_seq: Some(max_fragments),
                bytes_downloaded: fragment_size,
                ..Default::default()
            };
            match media_type.as_str() {
                "video" => update.video_seq = Some(current_fragment),
                "audio" => update.audio_seq = Some(current_fragment),
                _ => {}
            }
            DownloadEvent::Progress(update)
        }
        StatusLine::FormatSelection {
            manifest_id,
            major_type,
            quality_label,
            codec,
            itag,
            bitrate,
        } => DownloadEvent::Message(describe_format(
            &manifest_id,
            &major_type,
            quality_label.as_deref(),
            codec.as_deref(),
            itag,
            bitrate,
        )),
        StatusLine::StreamMux => DownloadEvent::MuxStarted,
        StatusLine::StreamUnavailable { reason } => DownloadEvent::Unavailable {
            reason: reason.unwrap_or_else(|| "Stream is unavailable".to_string()),
        },
        StatusLine::DownloadJobFinished { output } => {
            DownloadEvent::Finished(TerminalResult::Success { output })
        }
        StatusLine::DownloadJobFailedOutputMove { error } => {
            DownloadEvent::Finished(TerminalResult::FatalError(format!(
                "Failed to move output into place: {}",
                error.unwrap_or_else(|| "unknown error".to_string())
            )))
        }
        StatusLine::Failure { text, recoverable } => {
            if recoverable {
                DownloadEvent::Finished(TerminalResult::RecoverableError(text))
            } else {
                DownloadEvent::Finished(TerminalResult::FatalError(text))
            }
        }
        StatusLine::Text { text } => DownloadEvent::Message(text),
    }
}

fn describe_format(
    manifest_id: &str,
    major_type: &str,
    quality_label: Option<&str>,
    codec: Option<&str>,
    itag: Option<u32>,
    bitrate: Option<u64>,
) -> String {
    let mut kind = major_type.to_string();
    if let Some(first) = kind.get_mut(..1) {
        first.make_ascii_uppercase();
    }
    let codec = match codec {
        Some(c) if c.starts_with("avc1") => "h264",
        Some(c) => c,
        None => "unknown codec",
    };
    let itag = itag.map(|i| i.to_string()).unwrap_or_else(|| "?".to_string());

    match (major_type, quality_label, bitrate) {
        ("video", Some(quality), _) => format!(
            "{kind} format: {quality} {codec} (itag {itag}, manifest {manifest_id})"
        ),
        (_, _, Some(bitrate)) => format!(
            "{kind} format: {}k {codec} (itag {itag}, manifest {manifest_id})",
            bitrate / 1000
        ),
        _ => format!("{kind} format selected (manifest {manifest_id})"),
    }
}

/// Runs the configured downloader binary once per attempt.
pub struct CommandDownloader {
    command: String,
    player: PlayerClient,
}

impl CommandDownloader {
    pub fn new(command: impl Into<String>, player: PlayerClient) -> Self {
        Self {
            command: command.into(),
            player,
        }
    }

    fn build_args(&self, request: &DownloadRequest) -> Vec<String> {
        let mut args = vec![
            "--json-status".to_string(),
            "--num-parallel-downloads".to_string(),
            request.parallelism.to_string(),
            "--max-video-resolution".to_string(),
            request.max_video_resolution.to_string(),
        ];

        if let Some(dir) = &request.output_directory {
            args.push("--output-directory".to_string());
            args.push(dir.display().to_string());
        }
        if let Some(dir) = &request.staging_directory {
            args.push("--staging-directory".to_string());
            args.push(dir.join(&request.job_id).display().to_string());
        }

        let creds = &request.credentials;
        if let Some(token) = &creds.po_token {
            args.push("--po-token".to_string());
            args.push(token.clone());
        }
        if let Some(visitor) = &creds.visitor_data {
            args.push("--visitor-data".to_string());
            args.push(visitor.clone());
        }
        if let Some(path) = &creds.cookie_file {
            args.push("--cookies".to_string());
            args.push(path.display().to_string());
        }

        args.extend(request.extra_args.iter().cloned());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl Downloader for CommandDownloader {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn start(&self, request: DownloadRequest, handle: Arc<DownloadHandle>) -> Result<()> {
        let args = self.build_args(&request);
        info!(
            job_id = %request.job_id,
            attempt = request.attempt,
            "Starting {} for {}",
            self.command,
            request.url
        );

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::FatalDownload(format!("Failed to spawn {}: {}", self.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::FatalDownload("Failed to capture downloader stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::FatalDownload("Failed to capture downloader stderr".into()))?;

        let exit_rx = spawn_process_waiter(child, handle.cancellation_token.clone());

        let job_id = request.job_id.clone();
        tokio::spawn(async move {
            let mut reader = OutputRecordReader::new(stderr);
            while let Ok(Some(line)) = reader.next_record().await {
                debug!(job_id = %job_id, "downloader stderr: {}", line);
            }
        });

        tokio::spawn(async move {
            let mut reader = OutputRecordReader::new(stdout);
            let mut terminal: Option<TerminalResult> = None;

            loop {
                match reader.next_record().await {
                    Ok(Some(line)) => {
                        let event = match serde_json::from_str::<StatusLine>(&line) {
                            Ok(status) => translate(status),
                            Err(e) => {
                                debug!(job_id = %handle.job_id, "Ignoring status line ({}): {}", e, line);
                                continue;
                            }
                        };
                        if let DownloadEvent::Finished(result) = event {
                            // The process still has to exit before we report it.
                            terminal.get_or_insert(result);
                            continue;
                        }
                        if !handle.send(event).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(job_id = %handle.job_id, "Error reading downloader output: {}", e);
                        break;
                    }
                }
            }

            let exit = exit_rx.await.unwrap_or(Some(-1));
            let result = match (exit, terminal) {
                (None, _) => TerminalResult::Cancelled,
                (Some(_), Some(result)) => result,
                (Some(0), None) => TerminalResult::Success { output: None },
                (Some(code), None) => TerminalResult::RecoverableError(format!(
                    "Downloader exited with code {}",
                    code
                )),
            };
            let _ = handle.send(DownloadEvent::Finished(result)).await;
        });

        Ok(())
    }

    async fn probe(&self, content_id: &str) -> Result<Availability> {
        Ok(self.player.probe(content_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::credentials::Credentials;

    fn request() -> DownloadRequest {
        DownloadRequest {
            job_id: "job-1".into(),
            content_id: "dQw4w9WgXcQ".into(),
            url: "https://youtu.be/dQw4w9WgXcQ".into(),
            output_directory: Some(PathBuf::from("/out")),
            staging_directory: Some(PathBuf::from("/staging")),
            parallelism: 4,
            max_video_resolution: 1080,
            credentials: Credentials {
                po_token: Some("tok".into()),
                ..Default::default()
            },
            extra_args: vec!["--write-description".into()],
            attempt: 0,
        }
    }

    #[test]
    fn test_fragment_line_becomes_progress() {
        let line = r#"{"type":"fragment","manifest_id":"dQw4w9WgXcQ.1","media_type":"audio","current_fragment":7,"max_fragments":10,"fragment_size":4096}"#;
        let status: StatusLine = serde_json::from_str(line).unwrap();
        let DownloadEvent::Progress(update) = translate(status) else {
            panic!("expected progress");
        };
        assert_eq!(update.manifest_id, "dQw4w9WgXcQ.1");
        assert_eq!(update.audio_seq, Some(7));
        assert_eq!(update.video_seq, None);
        assert_eq!(update.max_seq, Some(10));
        assert_eq!(update.bytes_downloaded, 4096);
    }

    #[test]
    fn test_terminal_lines() {
        let finished: StatusLine =
            serde_json::from_str(r#"{"type":"download_job_finished","output":"/out/a.mp4"}"#).unwrap();
        assert!(matches!(
            translate(finished),
            DownloadEvent::Finished(TerminalResult::Success { output: Some(_) })
        ));

        let err: StatusLine =
            serde_json::from_str(r#"{"type":"error","text":"403","recoverable":true}"#).unwrap();
        assert!(matches!(
            translate(err),
            DownloadEvent::Finished(TerminalResult::RecoverableError(_))
        ));

        let unavailable: StatusLine = serde_json::from_str(r#"{"type":"stream_unavailable"}"#).unwrap();
        assert!(matches!(translate(unavailable), DownloadEvent::Unavailable { .. }));
    }

    #[test]
    fn test_format_description() {
        assert_eq!(
            describe_format("m.0", "video", Some("1080p60"), Some("avc1.640028"), Some(299), None),
            "Video format: 1080p60 h264 (itag 299, manifest m.0)"
        );
        assert_eq!(
            describe_format("m.0", "audio", None, Some("opus"), Some(251), Some(160_000)),
            "Audio format: 160k opus (itag 251, manifest m.0)"
        );
        assert_eq!(
            describe_format("m.0", "audio", None, None, None, None),
            "Audio format selected (manifest m.0)"
        );
    }

    #[test]
    fn test_build_args() {
        youtube_feeds::install_rustls_provider();
        let downloader = CommandDownloader::new(
            "moonarchive",
            PlayerClient::new(reqwest::Client::new()),
        );
        let args = downloader.build_args(&request());

        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/dQw4w9WgXcQ"));
        let staging = args.iter().position(|a| a == "--staging-directory").unwrap();
        assert_eq!(
            PathBuf::from(&args[staging + 1]),
            PathBuf::from("/staging").join("job-1")
        );
        assert!(args.windows(2).any(|w| w == ["--po-token", "tok"]));
        assert!(args.windows(2).any(|w| w == ["--num-parallel-downloads", "4"]));
        assert!(args.contains(&"--write-description".to_string()));
    }
}
