//! Long-lived tool invocation delivering output line by line.

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::runner::RunError;

const LINE_BUFFER: usize = 64;

/// How a streamed process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamExit {
    Exited { code: Option<i32> },
    Cancelled,
    WaitFailed(String),
}

impl fmt::Display for StreamExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamExit::Exited { code: Some(0) } => f.write_str("exited normally"),
            StreamExit::Exited { code: Some(code) } => write!(f, "exited with status {code}"),
            StreamExit::Exited { code: None } => f.write_str("terminated by signal"),
            StreamExit::Cancelled => f.write_str("cancelled"),
            StreamExit::WaitFailed(e) => write!(f, "wait failed: {e}"),
        }
    }
}

/// Line streams and completion signal of a running process.
///
/// Both streams end when the process closes the corresponding pipe.
/// `completion` resolves once the process has been reaped.
pub struct LineStreams {
    pub stdout: ReceiverStream<String>,
    pub stderr: ReceiverStream<String>,
    pub completion: oneshot::Receiver<StreamExit>,
}

impl LineStreams {
    /// Channels that let a caller play the part of the process.
    pub fn channel() -> (LineFeed, Self) {
        let (out_tx, out_rx) = mpsc::channel(LINE_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(LINE_BUFFER);
        let (done_tx, done_rx) = oneshot::channel();
        (
            LineFeed {
                stdout: out_tx,
                stderr: err_tx,
                completion: done_tx,
            },
            Self {
                stdout: ReceiverStream::new(out_rx),
                stderr: ReceiverStream::new(err_rx),
                completion: done_rx,
            },
        )
    }
}

/// Producer half of [`LineStreams::channel`].
pub struct LineFeed {
    pub stdout: mpsc::Sender<String>,
    pub stderr: mpsc::Sender<String>,
    pub completion: oneshot::Sender<StreamExit>,
}

/// Start `program` and stream its output. Cancelling `cancel` kills the
/// process; the completion then reports [`StreamExit::Cancelled`].
pub fn start(program: &Path, args: &[String], cancel: CancellationToken) -> Result<LineStreams, RunError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| RunError::Spawn {
        program: program.display().to_string(),
        source,
    })?;
    let stdout = child.stdout.take().ok_or(RunError::Pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(RunError::Pipe("stderr"))?;
    let pid = child.id();
    tracing::debug!(?pid, program = %program.display(), ?args, "streaming tool process started");

    let (feed, streams) = LineStreams::channel();
    tokio::spawn(forward_lines(stdout, feed.stdout));
    tokio::spawn(forward_lines(stderr, feed.stderr));

    let completion = feed.completion;
    tokio::spawn(async move {
        let exit = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => StreamExit::Exited { code: status.code() },
                Err(e) => StreamExit::WaitFailed(e.to_string()),
            },
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(?pid, "failed to kill streaming process: {e}");
                }
                StreamExit::Cancelled
            }
        };
        tracing::debug!(?pid, %exit, "streaming tool process ended");
        let _ = completion.send(exit);
    });

    Ok(streams)
}

async fn forward_lines<R: AsyncRead + Unpin>(pipe: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("line reader stopped: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn delivers_lines_then_completion() {
        let streams = start(
            Path::new("/bin/sh"),
            &sh("echo one; echo two; echo oops >&2; exit 4"),
            CancellationToken::new(),
        )
        .unwrap();

        let stdout: Vec<String> = streams.stdout.collect().await;
        let stderr: Vec<String> = streams.stderr.collect().await;
        assert_eq!(stdout, vec!["one", "two"]);
        assert_eq!(stderr, vec!["oops"]);
        assert_eq!(
            streams.completion.await.unwrap(),
            StreamExit::Exited { code: Some(4) }
        );
    }

    #[tokio::test]
    async fn cancel_kills_process() {
        let cancel = CancellationToken::new();
        let mut streams = start(
            Path::new("/bin/sh"),
            &sh("echo ready; exec sleep 30"),
            cancel.clone(),
        )
        .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), streams.stdout.next())
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("ready"));

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(5), streams.completion)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, StreamExit::Cancelled);
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let result = start(
            Path::new("/nonexistent/chip-tool"),
            &[],
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(RunError::Spawn { .. })));
    }
}
