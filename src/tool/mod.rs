//! Invoking the external controller tool.
//!
//! [`ToolRunner`] is the seam between the dispatcher and the operating
//! system. [`ChipTool`] is the production implementation; tests substitute a
//! scripted runner that records argument vectors.

pub mod runner;
pub mod stream;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

pub use runner::{ProcessOutput, RunError};
pub use stream::{LineFeed, LineStreams, StreamExit};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub trait ToolRunner: Send + Sync + 'static {
    /// Name used when echoing commands into narrative logs.
    fn program(&self) -> &str;

    /// Run to completion and capture output. Failures land in
    /// [`ProcessOutput::error`].
    fn run(&self, args: Vec<String>, timeout: Option<Duration>) -> BoxFuture<'_, ProcessOutput>;

    /// Start a long-lived process and stream its output until it exits or
    /// `cancel` fires.
    fn stream(&self, args: Vec<String>, cancel: CancellationToken) -> Result<LineStreams, RunError>;

    /// The command line as it would be typed, for logs.
    fn describe(&self, args: &[String]) -> String {
        let mut line = self.program().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// The real `chip-tool` binary.
#[derive(Debug, Clone)]
pub struct ChipTool {
    path: PathBuf,
    name: String,
}

impl ChipTool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the binary can be started at all, returning its first output
    /// line. Some builds have no `--version` and exit non-zero, which still
    /// proves the binary runs.
    pub async fn probe(&self) -> Result<String, RunError> {
        let output = runner::run(&self.path, &["--version".to_string()], Some(PROBE_TIMEOUT)).await;
        match output.error {
            Some(e @ RunError::Spawn { .. }) | Some(e @ RunError::Timeout(_)) => Err(e),
            _ => Ok(output
                .stdout
                .lines()
                .chain(output.stderr.lines())
                .find(|l| !l.trim().is_empty())
                .unwrap_or_default()
                .trim()
                .to_string()),
        }
    }
}

impl ToolRunner for ChipTool {
    fn program(&self) -> &str {
        &self.name
    }

    fn run(&self, args: Vec<String>, timeout: Option<Duration>) -> BoxFuture<'_, ProcessOutput> {
        async move { runner::run(&self.path, &args, timeout).await }.boxed()
    }

    fn stream(&self, args: Vec<String>, cancel: CancellationToken) -> Result<LineStreams, RunError> {
        stream::start(&self.path, &args, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_joins_args() {
        let tool = ChipTool::new("/opt/matter/chip-tool");
        assert_eq!(
            tool.describe(&["onoff".into(), "on".into(), "7".into(), "1".into()]),
            "chip-tool onoff on 7 1"
        );
    }

    #[tokio::test]
    async fn probe_missing_binary_fails() {
        let tool = ChipTool::new("/nonexistent/chip-tool");
        assert!(matches!(tool.probe().await, Err(RunError::Spawn { .. })));
    }

    #[tokio::test]
    async fn probe_accepts_nonzero_exit() {
        // `false` ignores its arguments and exits 1.
        let tool = ChipTool::new("/bin/false");
        assert_eq!(tool.probe().await.unwrap(), "");
    }

    #[tokio::test]
    async fn run_through_trait_object() {
        let tool: Box<dyn ToolRunner> = Box::new(ChipTool::new("/bin/echo"));
        let out = tool.run(vec!["hello".into()], None).await;
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
    }
}
