//! Tool invocations scheduled by the engine
//!
//! Each job runs one process through a [`ProcessRunner`](crate::runner::ProcessRunner)
//! and feeds what it learns back into the engine. Jobs own their failure
//! handling: by the time `run` returns, the item concerned has been updated.

use super::QueueEngine;
use super::report::{internal_fatal, silent_failure};
use crate::diagnostics::Classification;
use crate::error::Result;
use crate::job::{Job, JobKind};
use crate::parsers::{MediaInfo, ProgressParser, parse_info};
use crate::runner::{BufferedOutcome, OutputLine, OutputStream, RunOutcome, ToolRequest};
use crate::types::{DownloadOptions, Fatal, GroupId, ItemId, LifecycleState};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Outcome of a failed buffered run
type Failure = Option<(String, Option<i32>)>;

/// Run `request` buffered, returning its output and the failure details, if any
async fn run_buffered(
    engine: &QueueEngine,
    request: &ToolRequest,
    cancel: &CancellationToken,
) -> Result<(BufferedOutcome, Failure)> {
    let runner = engine.collaborators.runner_config.runner(request)?;
    let mut failure = None;
    let outcome = runner
        .run_buffered(cancel, |stderr, exit_code| {
            failure = Some((stderr.to_string(), exit_code));
        })
        .await?;
    Ok((outcome, failure))
}

fn buffered_exit(failure: &Failure) -> RunOutcome {
    RunOutcome::Done {
        exit_code: failure.as_ref().map_or(Some(0), |(_, code)| *code),
    }
}

/// Fetches metadata of a submitted URL
pub(crate) struct FetchInfoJob {
    pub(crate) engine: QueueEngine,
    pub(crate) group_id: GroupId,
    pub(crate) item_id: ItemId,
    pub(crate) url: String,
}

impl FetchInfoJob {
    /// Classify the failure line by line; the first raised error wins
    fn fail(&self, stderr: &str, exit_code: Option<i32>) {
        let raised = stderr.lines().any(|line| {
            self.engine
                .apply_classification(self.group_id, self.item_id, line, exit_code)
        });
        if !raised {
            self.engine
                .fail_item(self.group_id, self.item_id, silent_failure(stderr, exit_code));
        }
    }
}

#[async_trait]
impl Job for FetchInfoJob {
    fn kind(&self) -> JobKind {
        JobKind::FetchInfo
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<RunOutcome> {
        let request = ToolRequest::FetchInfo {
            url: self.url.clone(),
            flatten_playlist: self.engine.config.runner.flatten_playlist,
        };
        let (outcome, failure) = match run_buffered(&self.engine, &request, &cancel).await {
            Ok(result) => result,
            Err(e) => {
                self.engine
                    .fail_item(self.group_id, self.item_id, internal_fatal(e.to_string()));
                return Err(e);
            }
        };

        match outcome {
            BufferedOutcome::Killed => return Ok(RunOutcome::Killed),
            BufferedOutcome::Stalled => {
                self.engine.fail_item(
                    self.group_id,
                    self.item_id,
                    internal_fatal("Fetching metadata stalled. The tool stopped producing output."),
                );
                return Ok(RunOutcome::Stalled);
            }
            BufferedOutcome::Output(json) => {
                if let Some((stderr, exit_code)) = &failure {
                    self.fail(stderr, *exit_code);
                } else {
                    match parse_info(&json) {
                        Ok(info) => self.engine.ingest_info(self.group_id, self.item_id, info),
                        Err(e) => {
                            tracing::warn!(url = %self.url, error = %e, "Unparseable metadata");
                            self.engine.fail_item(
                                self.group_id,
                                self.item_id,
                                internal_fatal(format!("Could not read the media metadata: {e}")),
                            );
                        }
                    }
                }
            }
        }
        Ok(buffered_exit(&failure))
    }
}

/// Fetches metadata of one playlist entry
pub(crate) struct FetchEntryJob {
    pub(crate) engine: QueueEngine,
    pub(crate) group_id: GroupId,
    pub(crate) url: String,
}

#[async_trait]
impl Job for FetchEntryJob {
    fn kind(&self) -> JobKind {
        JobKind::FetchEntry
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<RunOutcome> {
        let request = ToolRequest::FetchEntry {
            url: self.url.clone(),
        };
        let (outcome, failure) = match run_buffered(&self.engine, &request, &cancel).await {
            Ok(result) => result,
            Err(e) => {
                self.engine.add_unavailable(self.group_id, &self.url);
                return Err(e);
            }
        };

        match outcome {
            BufferedOutcome::Killed => return Ok(RunOutcome::Killed),
            BufferedOutcome::Stalled => {
                self.engine.add_unavailable(self.group_id, &self.url);
                return Ok(RunOutcome::Stalled);
            }
            BufferedOutcome::Output(_) if failure.is_some() => {
                tracing::debug!(url = %self.url, "Playlist entry unavailable");
                self.engine.add_unavailable(self.group_id, &self.url);
            }
            BufferedOutcome::Output(json) => match parse_info(&json) {
                Ok(MediaInfo::Single(info)) => {
                    self.engine.add_entry(self.group_id, &self.url, info)
                }
                Ok(MediaInfo::Playlist(_)) => {
                    tracing::debug!(url = %self.url, "Nested playlist entry skipped");
                    self.engine.add_unavailable(self.group_id, &self.url);
                }
                Err(e) => {
                    tracing::debug!(url = %self.url, error = %e, "Unparseable entry metadata");
                    self.engine.add_unavailable(self.group_id, &self.url);
                }
            },
        }
        Ok(buffered_exit(&failure))
    }
}

/// Estimates the size of one item for a selection
pub(crate) struct SizeJob {
    pub(crate) engine: QueueEngine,
    pub(crate) url: String,
    pub(crate) options: DownloadOptions,
    pub(crate) size: Option<u64>,
}

#[async_trait]
impl Job for SizeJob {
    fn kind(&self) -> JobKind {
        JobKind::Size
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<RunOutcome> {
        let request = ToolRequest::Size {
            url: self.url.clone(),
            options: self.options.clone(),
        };
        let (outcome, failure) = run_buffered(&self.engine, &request, &cancel).await?;
        match outcome {
            BufferedOutcome::Killed => Ok(RunOutcome::Killed),
            BufferedOutcome::Stalled => Ok(RunOutcome::Stalled),
            BufferedOutcome::Output(stdout) => {
                if failure.is_none() {
                    self.size = parse_size(&stdout);
                } else {
                    tracing::debug!(url = %self.url, "Size lookup failed");
                }
                Ok(buffered_exit(&failure))
            }
        }
    }
}

/// Last numeric line of the size output ("NA" when unknown)
fn parse_size(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as u64)
}

/// Downloads one item
pub(crate) struct DownloadJob {
    pub(crate) engine: QueueEngine,
    pub(crate) group_id: GroupId,
    pub(crate) item_id: ItemId,
    pub(crate) url: String,
    pub(crate) options: DownloadOptions,
    pub(crate) headers: Option<HashMap<String, String>>,
    parser: ProgressParser,
    cancel: Option<CancellationToken>,
    fatal: Option<Fatal>,
    suppressed: bool,
}

impl DownloadJob {
    pub(crate) fn new(
        engine: QueueEngine,
        group_id: GroupId,
        item_id: ItemId,
        url: String,
        options: DownloadOptions,
        headers: Option<HashMap<String, String>>,
    ) -> Self {
        Self {
            engine,
            group_id,
            item_id,
            url,
            options,
            headers,
            parser: ProgressParser::new(),
            cancel: None,
            fatal: None,
            suppressed: false,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn classify(&mut self, text: &str) {
        match self.engine.classifier.classify(text, None) {
            Classification::NoMatch => {}
            Classification::Informational(diagnostic) => {
                let (group_id, item_id) = (self.group_id, self.item_id);
                self.engine.with_model(|model, fx| {
                    model.record_diagnostic(group_id, item_id, diagnostic, fx)
                });
            }
            Classification::Suppressed { .. } => self.suppressed = true,
            Classification::Known(fatal) | Classification::Unhandled(fatal) => {
                // Only the first error of a run is raised
                if self.fatal.is_none() {
                    self.fatal = Some(fatal);
                }
            }
        }
    }

    fn finish(&mut self, exit_code: Option<i32>) {
        if let Some(mut fatal) = self.fatal.take() {
            fatal.exit_code = exit_code;
            self.engine.fail_item(self.group_id, self.item_id, fatal);
        } else if exit_code == Some(0) || self.suppressed {
            self.engine.complete_item(self.group_id, self.item_id);
        } else {
            self.engine.fail_item(
                self.group_id,
                self.item_id,
                silent_failure("", exit_code),
            );
        }
    }
}

#[async_trait]
impl Job for DownloadJob {
    fn kind(&self) -> JobKind {
        JobKind::Download
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<RunOutcome> {
        // Paused or deleted while queued
        if self.engine.item_state(self.item_id) != Some(LifecycleState::Downloading) {
            return Ok(RunOutcome::Killed);
        }
        self.cancel = Some(cancel.clone());
        let request = ToolRequest::Download {
            url: self.url.clone(),
            options: self.options.clone(),
            headers: self.headers.clone(),
        };

        let runner = match self.engine.collaborators.runner_config.runner(&request) {
            Ok(runner) => runner,
            Err(e) => {
                self.engine
                    .fail_item(self.group_id, self.item_id, internal_fatal(e.to_string()));
                return Err(e);
            }
        };
        tracing::info!(
            group_id = %self.group_id,
            item_id = %self.item_id,
            url = %self.url,
            "Download started"
        );

        let outcome = match runner.run_streaming(&cancel, |line| self.on_line(line)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.engine
                    .fail_item(self.group_id, self.item_id, internal_fatal(e.to_string()));
                return Err(e);
            }
        };

        match outcome {
            RunOutcome::Done { exit_code } => self.finish(exit_code),
            RunOutcome::Killed => {
                tracing::info!(group_id = %self.group_id, item_id = %self.item_id, "Download interrupted");
            }
            RunOutcome::Stalled => self.engine.fail_item(
                self.group_id,
                self.item_id,
                internal_fatal("The download stalled. The tool stopped producing output."),
            ),
        }
        Ok(outcome)
    }

    fn on_line(&mut self, line: OutputLine) {
        if self.cancelled() {
            return;
        }
        for parsed in self.parser.parse_line(&line.text) {
            self.engine
                .apply_progress_line(self.group_id, self.item_id, parsed);
        }
        if line.stream == OutputStream::Stderr {
            self.classify(&line.text);
        }
    }

    fn on_cancel(&mut self) {
        self.fatal = None;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_output_parsing() {
        assert_eq!(parse_size("12345\n"), Some(12345));
        assert_eq!(parse_size("[info] x\n1048576.0"), Some(1_048_576));
        assert_eq!(parse_size("NA"), None);
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("-3"), None);
    }
}
