//! Unit of work scheduled by the [`Limiter`](crate::limiter::Limiter)
//!
//! Every tool invocation the engine makes is a [`Job`]: it runs one process,
//! observes its output line by line and learns about cancellation. The
//! limiter and the runner depend only on this trait.

use crate::error::Result;
use crate::runner::{OutputLine, RunOutcome};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Kind of tool invocation a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Metadata of a submitted URL
    FetchInfo,
    /// Metadata of one playlist entry
    FetchEntry,
    /// Size estimate for a selection
    Size,
    /// Media download
    Download,
}

impl JobKind {
    /// Name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::FetchInfo => "fetch_info",
            JobKind::FetchEntry => "fetch_entry",
            JobKind::Size => "size",
            JobKind::Download => "download",
        }
    }
}

/// A schedulable tool invocation
#[async_trait]
pub trait Job: Send {
    /// What this job does
    fn kind(&self) -> JobKind;

    /// Run to completion or until `cancel` fires
    async fn run(&mut self, cancel: CancellationToken) -> Result<RunOutcome>;

    /// Observe one line of output
    fn on_line(&mut self, _line: OutputLine) {}

    /// Called when the job was revoked before it ran or interrupted while running
    fn on_cancel(&mut self) {}
}
