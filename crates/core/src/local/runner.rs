//! Streaming subprocess runner for the local pipeline.
//!
//! Unlike a capture-everything runner, the reconstruction script runs for a
//! long time, so stdout is forwarded line by line to the log as it arrives
//! and stderr is drained concurrently on its own task.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Spawn `cmd`, stream its output into the log and wait for it to exit.
///
/// A non-zero exit status is returned, not turned into an error; only a
/// failure to spawn or wait on the process is an error.
pub async fn run_streaming(cmd: &mut Command) -> std::io::Result<ExitStatus> {
    // `kill_on_drop(true)` stops the script if the owning task is dropped
    // (e.g. on shutdown cancellation).
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    tracing::info!(pid = child.id(), "Local job process started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stderr_task = tokio::spawn(async move {
        if let Some(stderr) = stderr {
            forward_lines(stderr, "stderr").await;
        }
    });

    if let Some(stdout) = stdout {
        forward_lines(stdout, "stdout").await;
    }

    let status = child.wait().await?;
    let _ = stderr_task.await;
    Ok(status)
}

/// Log every line of `stream` until EOF. Invalid UTF-8 is replaced.
async fn forward_lines<R: AsyncRead + Unpin>(stream: R, name: &'static str) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if name == "stderr" {
                    tracing::warn!(stream = name, "{line}");
                } else {
                    tracing::info!(stream = name, "{line}");
                }
            }
            Err(e) => {
                tracing::warn!(stream = name, error = %e, "Failed to read process output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_exit_status_without_error() {
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "echo working; echo oops >&2; exit 3"]);
        let status = run_streaming(&mut cmd).await.expect("run");
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let mut cmd = Command::new("/definitely/not/a/program");
        assert!(run_streaming(&mut cmd).await.is_err());
    }
}
