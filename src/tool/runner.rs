//! One-shot tool invocation: run to completion, capture both streams.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long to wait for the pipe readers after the process has gone away.
/// A grandchild holding the pipes open must not wedge the caller.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{}", exit_description(.code))]
    Exit { code: Option<i32> },

    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("failed waiting for process: {0}")]
    Wait(#[source] io::Error),

    #[error("{0} was not captured")]
    Pipe(&'static str),
}

impl RunError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunError::Timeout(_))
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Everything a one-shot run produced.
///
/// `stdout`/`stderr` hold whatever was captured even when `error` is set, so
/// callers can still parse partial output after a timeout.
#[derive(Debug, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<RunError>,
}

impl ProcessOutput {
    pub fn failed(error: RunError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Both streams in one block, for narrative logs.
    pub fn combined(&self) -> String {
        format!("Stdout:\n{}\nStderr:\n{}", self.stdout, self.stderr)
    }
}

/// Run `program` with `args` and capture its output.
///
/// With a `timeout`, the process is killed once it elapses and the result
/// carries [`RunError::Timeout`]. Never panics and never returns early
/// without an error set.
pub async fn run(program: &Path, args: &[String], timeout: Option<Duration>) -> ProcessOutput {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            return ProcessOutput::failed(RunError::Spawn {
                program: program.display().to_string(),
                source,
            })
        }
    };
    let pid = child.id();
    tracing::debug!(?pid, program = %program.display(), ?args, "tool process started");

    let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(result) => result.map_err(RunError::Wait),
            Err(_) => {
                tracing::warn!(?pid, ?limit, "tool process timed out, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(?pid, "failed to kill timed-out process: {e}");
                }
                Err(RunError::Timeout(limit))
            }
        },
        None => child.wait().await.map_err(RunError::Wait),
    };

    let stdout = drain(stdout_task, "stdout").await;
    let stderr = drain(stderr_task, "stderr").await;

    let error = match waited {
        Ok(status) if status.success() => None,
        Ok(status) => Some(RunError::Exit {
            code: status.code(),
        }),
        Err(e) => Some(e),
    };
    tracing::debug!(?pid, error = ?error, "tool process finished");

    ProcessOutput {
        stdout,
        stderr,
        error,
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        tracing::debug!("pipe read ended early: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn drain(task: JoinHandle<String>, name: &'static str) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, task).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(pipe = name, "pipe reader failed: {e}");
            String::new()
        }
        Err(_) => {
            abort.abort();
            tracing::warn!(pipe = name, "pipe still open after process exit, output dropped");
            String::new()
        }
    }
}
