//! External tool invocation.
//!
//! Every LaTeX toolchain stage goes through the [`ToolInvoker`] capability so
//! converters can be exercised with a fake in tests instead of real
//! subprocesses. [`ProcessInvoker`] is the production implementation: it
//! runs the program directly (no shell, so paths with spaces or quotes need
//! no escaping), captures both output streams, and turns any non-success
//! exit into [`ConversionError::ToolFailure`].

use crate::error::ConversionError;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest stderr excerpt carried in a failure message.
const STDERR_TAIL_BYTES: usize = 2000;

/// One external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; inherits the service's when `None`.
    pub cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Capability to run one external conversion stage.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run `command` to completion. Non-success exit is an error.
    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutput, ConversionError>;
}

/// Runs tools as child processes via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill and fail any invocation that runs longer than `secs`.
    pub fn with_timeout_secs(secs: Option<u64>) -> Self {
        Self {
            timeout: secs.map(Duration::from_secs),
        }
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutput, ConversionError> {
        let rendered = command.to_string();
        info!("Running: {}", rendered);
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args).kill_on_drop(true);
        if let Some(ref dir) = command.cwd {
            cmd.current_dir(dir);
        }

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| ConversionError::ToolTimeout {
                    command: rendered.clone(),
                    secs: limit.as_secs(),
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| ConversionError::ToolFailure {
            command: rendered.clone(),
            exit: format!("failed to start: {e}"),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            warn!("{} exited with {}", command.program, output.status);
            return Err(ConversionError::ToolFailure {
                command: rendered,
                exit: format!("{}\nStderr: {}", output.status, tail(&stderr, STDERR_TAIL_BYTES)),
            });
        }

        debug!(
            "{} finished in {}ms ({} bytes stdout)",
            command.program,
            start.elapsed().as_millis(),
            stdout.len()
        );
        Ok(ToolOutput { stdout, stderr })
    }
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    let s = s.trim_end();
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_display_joins_args() {
        let cmd = ToolCommand::new("pandoc")
            .arg("-f")
            .arg("html")
            .arg("out.html");
        assert_eq!(cmd.to_string(), "pandoc -f html out.html");
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("short", 100), "short");
        assert_eq!(tail("abcdef", 3), "def");
        let s = "ééé";
        let t = tail(s, 3);
        assert!(s.ends_with(t));
        assert!(t.len() <= 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_process_captures_stdout() {
        let out = ProcessInvoker::new()
            .invoke(&ToolCommand::new("sh").arg("-c").arg("echo converted"))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "converted");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_tool_failure() {
        let err = ProcessInvoker::new()
            .invoke(&ToolCommand::new("sh").arg("-c").arg("echo broken >&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            ConversionError::ToolFailure { command, exit } => {
                assert!(command.starts_with("sh -c"));
                assert!(exit.contains('3'), "got: {exit}");
                assert!(exit.contains("broken"), "got: {exit}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_tool_failure() {
        let err = ProcessInvoker::new()
            .invoke(&ToolCommand::new("definitely-not-a-real-latex-tool"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::ToolFailure { .. }));
        assert!(err.to_string().contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_slow_tools() {
        let err = ProcessInvoker::with_timeout_secs(Some(1))
            .invoke(&ToolCommand::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::ToolTimeout { secs: 1, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessInvoker::new()
            .invoke(&ToolCommand::new("pwd").current_dir(dir.path()))
            .await
            .unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }
}
