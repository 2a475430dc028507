//! Child process supervision with cancellation support.

use tokio::process::Child;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Spawn a task that waits for a process to exit and reports the result.
///
/// If the cancellation token fires first the process is killed and `None`
/// is sent. Otherwise the exit code is sent; a failed wait or a death by
/// signal reports `Some(-1)`.
pub fn spawn_process_waiter(
    mut child: Child,
    cancellation_token: CancellationToken,
) -> oneshot::Receiver<Option<i32>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let exit_code = tokio::select! {
            _ = cancellation_token.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill downloader process: {}", e);
                }
                None
            }
            status = child.wait() => {
                match status {
                    Ok(exit_status) => {
                        let code = exit_status.code();
                        if let Some(c) = code
                            && c != 0
                        {
                            warn!("Downloader process exited with code: {}", c);
                        }
                        Some(code.unwrap_or(-1))
                    }
                    Err(e) => {
                        error!("Error waiting for downloader process: {}", e);
                        Some(-1)
                    }
                }
            }
        };
        let _ = tx.send(exit_code);
    });

    rx
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn reports_exit_code() {
        let child = Command::new("sh")
            .args(["-c", "exit 3"])
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let rx = spawn_process_waiter(child, CancellationToken::new());
        assert_eq!(rx.await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn cancellation_kills_process() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let token = CancellationToken::new();
        let rx = spawn_process_waiter(child, token.clone());
        token.cancel();
        assert_eq!(rx.await.unwrap(), None);
    }
}
