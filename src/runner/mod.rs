//! External process execution
//!
//! [`ProcessRunner`] spawns one tool invocation and either streams its output
//! line by line ([`ProcessRunner::run_streaming`]) or collects it
//! ([`ProcessRunner::run_buffered`]). Both modes honour a [`CancellationToken`]:
//! the process is interrupted (SIGINT to its process group on unix), given a
//! grace period to exit, then killed.
//!
//! What to run is decided by a [`RunnerConfigProvider`] (see [`config`]).

pub mod config;

pub use config::{RunnerConfigProvider, ToolRequest, YtdlpRunnerConfig};

use crate::error::{Error, Result};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::sync::CancellationToken;

/// Result handed back by buffered runs that failed
pub const EMPTY_RESULT: &str = "{}";

/// A fully resolved tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable
    pub program: PathBuf,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Invocation of `program` without arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Stream a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// One line of tool output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Where the line came from
    pub stream: OutputStream,
    /// Line text, lossily decoded
    pub text: String,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own
    Done {
        /// Exit code, absent when terminated by a signal
        exit_code: Option<i32>,
    },
    /// The process was interrupted through cancellation
    Killed,
    /// The process produced no output within the liveness timeout
    Stalled,
}

impl RunOutcome {
    /// Whether the process exited with code 0
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Done { exit_code: Some(0) })
    }
}

/// Result of a buffered run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferedOutcome {
    /// Standard output, or [`EMPTY_RESULT`] when the tool failed
    Output(String),
    /// Cancelled
    Killed,
    /// Stalled
    Stalled,
}

enum Step {
    Line(OutputLine),
    ReadError(String),
    StreamsClosed,
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    GraceElapsed,
    Stalled,
}

/// Runs one external tool invocation
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    invocation: Invocation,
    grace_period: Duration,
    liveness_timeout: Option<Duration>,
}

impl ProcessRunner {
    /// Runner for `invocation` with a 5 second grace period and no liveness timeout
    pub fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            grace_period: Duration::from_secs(5),
            liveness_timeout: None,
        }
    }

    /// Time the process gets to exit after an interrupt
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Interrupt the process when it is silent for this long
    pub fn with_liveness_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// The invocation this runner executes
    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.invocation.program);
        cmd.args(&self.invocation.args)
            .envs(self.invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    fn spawn(&self) -> Result<Child> {
        self.command().spawn().map_err(|e| {
            Error::ExternalTool(format!(
                "Failed to execute {}: {}",
                self.invocation.program.display(),
                e
            ))
        })
    }

    /// Run the process, forwarding each non-empty output line to `on_line`
    ///
    /// Lines are split on `\n` or `\r` so carriage-return progress updates
    /// arrive one by one. Resolves once both output streams closed and the
    /// process exited.
    pub async fn run_streaming<F>(&self, cancel: &CancellationToken, mut on_line: F) -> Result<RunOutcome>
    where
        F: FnMut(OutputLine),
    {
        let mut child = self.spawn()?;
        let pid = child.id();
        tracing::debug!(
            program = %self.invocation.program.display(),
            pid = ?pid,
            "Spawned tool"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ExternalTool("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ExternalTool("stderr was not captured".into()))?;

        let out = FramedRead::new(stdout, line_codec()).map(|f| decode(OutputStream::Stdout, f));
        let err = FramedRead::new(stderr, line_codec()).map(|f| decode(OutputStream::Stderr, f));
        let mut lines = futures::stream::select(out, err);

        let mut streams_open = true;
        let mut interrupted = false;
        let mut stalled = false;
        let mut grace_deadline: Option<Instant> = None;
        let mut last_output = Instant::now();

        loop {
            let liveness_deadline = match self.liveness_timeout {
                Some(timeout) if !interrupted => Some(last_output + timeout),
                _ => None,
            };

            let step = tokio::select! {
                line = lines.next(), if streams_open => match line {
                    Some(Ok(line)) => Step::Line(line),
                    Some(Err(e)) => Step::ReadError(e),
                    None => Step::StreamsClosed,
                },
                status = child.wait(), if !streams_open => Step::Exited(status),
                _ = cancel.cancelled(), if !interrupted => Step::Cancelled,
                _ = sleep_until(grace_deadline) => Step::GraceElapsed,
                _ = sleep_until(liveness_deadline) => Step::Stalled,
            };

            match step {
                Step::Line(line) => {
                    last_output = Instant::now();
                    if !line.text.trim().is_empty() {
                        on_line(line);
                    }
                }
                Step::ReadError(e) => {
                    tracing::debug!(error = %e, "Failed to read tool output");
                }
                Step::StreamsClosed => streams_open = false,
                Step::Exited(status) => {
                    let status = status?;
                    if stalled {
                        return Ok(RunOutcome::Stalled);
                    }
                    if interrupted {
                        return Ok(RunOutcome::Killed);
                    }
                    tracing::debug!(pid = ?pid, exit_code = ?status.code(), "Tool exited");
                    return Ok(RunOutcome::Done {
                        exit_code: status.code(),
                    });
                }
                Step::Cancelled => {
                    tracing::debug!(pid = ?pid, "Interrupting tool");
                    interrupted = true;
                    interrupt(&mut child);
                    grace_deadline = Some(Instant::now() + self.grace_period);
                }
                Step::Stalled => {
                    tracing::warn!(
                        pid = ?pid,
                        timeout_secs = self.liveness_timeout.map(|t| t.as_secs()),
                        "Tool produced no output, interrupting"
                    );
                    stalled = true;
                    interrupted = true;
                    interrupt(&mut child);
                    grace_deadline = Some(Instant::now() + self.grace_period);
                }
                Step::GraceElapsed => {
                    tracing::warn!(pid = ?pid, "Tool ignored interrupt, killing");
                    grace_deadline = None;
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(error = %e, "Failed to kill tool");
                    }
                }
            }
        }
    }

    /// Run the process to completion and return its standard output
    ///
    /// When the tool exits with a non-zero code, `on_failure` receives its
    /// standard error and exit code, and [`EMPTY_RESULT`] is returned.
    pub async fn run_buffered<F>(&self, cancel: &CancellationToken, on_failure: F) -> Result<BufferedOutcome>
    where
        F: FnOnce(&str, Option<i32>),
    {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let outcome = self
            .run_streaming(cancel, |line| {
                let buf = match line.stream {
                    OutputStream::Stdout => &mut stdout,
                    OutputStream::Stderr => &mut stderr,
                };
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(&line.text);
            })
            .await?;

        Ok(match outcome {
            RunOutcome::Killed => BufferedOutcome::Killed,
            RunOutcome::Stalled => BufferedOutcome::Stalled,
            RunOutcome::Done { exit_code: Some(0) } => BufferedOutcome::Output(stdout),
            RunOutcome::Done { exit_code } => {
                on_failure(&stderr, exit_code);
                BufferedOutcome::Output(EMPTY_RESULT.to_string())
            }
        })
    }
}

fn decode<B, E>(stream: OutputStream, frame: std::result::Result<B, E>) -> std::result::Result<OutputLine, String>
where
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    frame
        .map(|bytes| OutputLine {
            stream,
            text: String::from_utf8_lossy(bytes.as_ref()).into_owned(),
        })
        .map_err(|e| e.to_string())
}

fn line_codec() -> AnyDelimiterCodec {
    AnyDelimiterCodec::new(b"\r\n".to_vec(), b"\n".to_vec())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Ask the process group to stop
#[cfg(unix)]
fn interrupt(child: &mut Child) {
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The negative pid
    // addresses the process group created for this child at spawn.
    let rc = unsafe { libc::kill(-pid, libc::SIGINT) };
    if rc != 0 {
        tracing::debug!(
            pid,
            error = %std::io::Error::last_os_error(),
            "Failed to signal process group"
        );
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Failed to kill tool");
    }
}
