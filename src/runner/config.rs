//! Argument construction for tool invocations

use super::{Invocation, ProcessRunner};
use crate::config::{RunnerConfig, ToolsConfig};
use crate::error::{Error, Result};
use crate::parsers::PROGRESS_TEMPLATE;
use crate::types::{DownloadOptions, TrackType};
use std::collections::HashMap;
use std::path::PathBuf;

/// Minimum change in percent between two progress lines
const PROGRESS_DELTA: &str = "0.5";

/// Output template relative to the download directory
const OUTPUT_TEMPLATE: &str = "%(title)s [%(id)s].%(ext)s";

/// What a job needs the tool to do
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    /// Metadata of a submitted URL
    FetchInfo {
        /// URL to inspect
        url: String,
        /// Fetch playlists as a flat entry list
        flatten_playlist: bool,
    },
    /// Metadata of one playlist entry
    FetchEntry {
        /// Entry URL
        url: String,
    },
    /// Size estimate for a selection
    Size {
        /// Item URL
        url: String,
        /// Selection to estimate
        options: DownloadOptions,
    },
    /// Download with a selection
    Download {
        /// Item URL
        url: String,
        /// Selection to download
        options: DownloadOptions,
        /// Extra HTTP headers
        headers: Option<HashMap<String, String>>,
    },
}

impl ToolRequest {
    /// URL the request targets
    pub fn url(&self) -> &str {
        match self {
            ToolRequest::FetchInfo { url, .. }
            | ToolRequest::FetchEntry { url }
            | ToolRequest::Size { url, .. }
            | ToolRequest::Download { url, .. } => url,
        }
    }
}

/// Turns requests into concrete invocations
///
/// The engine depends only on this trait; the default implementation targets
/// yt-dlp. Tests substitute scripted invocations.
pub trait RunnerConfigProvider: Send + Sync {
    /// Build the invocation for `request`
    fn invocation(&self, request: &ToolRequest) -> Result<Invocation>;

    /// Runner for `request`, with the provider's timeouts applied
    fn runner(&self, request: &ToolRequest) -> Result<ProcessRunner> {
        Ok(ProcessRunner::new(self.invocation(request)?))
    }
}

/// Invocations of yt-dlp
#[derive(Debug, Clone)]
pub struct YtdlpRunnerConfig {
    tools: ToolsConfig,
    runner: RunnerConfig,
}

impl YtdlpRunnerConfig {
    /// Create a provider from tool paths and per-invocation settings
    pub fn new(tools: ToolsConfig, runner: RunnerConfig) -> Self {
        Self { tools, runner }
    }

    /// yt-dlp executable: the configured path, else a PATH lookup when allowed
    pub fn ytdlp_binary(&self) -> Result<PathBuf> {
        resolve_binary(self.tools.ytdlp_path.as_ref(), "yt-dlp", self.tools.search_path)
    }

    /// ffmpeg executable, if one can be found
    pub fn ffmpeg_binary(&self) -> Option<PathBuf> {
        resolve_binary(self.tools.ffmpeg_path.as_ref(), "ffmpeg", self.tools.search_path).ok()
    }

    fn common_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["--encoding".into(), "utf-8".into()];
        if let Some(proxy) = &self.runner.proxy {
            args.extend(["--proxy".into(), proxy.clone()]);
        }
        if let Some(user_agent) = &self.runner.user_agent {
            args.extend(["--user-agent".into(), user_agent.clone()]);
        }
        if let Some(cookies) = &self.runner.cookies_file {
            args.extend(["--cookies".into(), cookies.display().to_string()]);
        }
        if let Some(ffmpeg) = self.ffmpeg_binary() {
            args.extend(["--ffmpeg-location".into(), ffmpeg.display().to_string()]);
        }
        args
    }
}

impl RunnerConfigProvider for YtdlpRunnerConfig {
    fn invocation(&self, request: &ToolRequest) -> Result<Invocation> {
        let mut args = self.common_args();

        match request {
            ToolRequest::FetchInfo {
                flatten_playlist, ..
            } => {
                args.push("-J".into());
                if *flatten_playlist {
                    args.push("--flat-playlist".into());
                }
            }
            ToolRequest::FetchEntry { .. } => {
                args.extend(["-J".into(), "--no-playlist".into()]);
            }
            ToolRequest::Size { options, .. } => {
                args.extend(format_args(options));
                args.extend([
                    "--no-playlist".into(),
                    "--skip-download".into(),
                    "-O".into(),
                    "%(filesize,filesize_approx)s".into(),
                ]);
            }
            ToolRequest::Download {
                options, headers, ..
            } => {
                args.extend(format_args(options));
                args.extend(progress_args());
                args.push("--no-playlist".into());
                if let Some(rate) = &self.runner.rate_limit {
                    args.extend(["--limit-rate".into(), rate.clone()]);
                }
                let mut headers: Vec<_> = headers.iter().flatten().collect();
                headers.sort();
                for (name, value) in headers {
                    args.extend(["--add-header".into(), format!("{name}:{value}")]);
                }
                args.extend([
                    "-P".into(),
                    self.runner.download_dir.display().to_string(),
                    "-o".into(),
                    OUTPUT_TEMPLATE.into(),
                ]);
            }
        }

        args.extend(["--".into(), request.url().to_string()]);
        Ok(Invocation::new(self.ytdlp_binary()?).args(args))
    }

    fn runner(&self, request: &ToolRequest) -> Result<ProcessRunner> {
        Ok(ProcessRunner::new(self.invocation(request)?)
            .with_grace_period(self.runner.stop_grace_period)
            .with_liveness_timeout(self.runner.liveness_timeout))
    }
}

fn resolve_binary(explicit: Option<&PathBuf>, name: &str, search_path: bool) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    if !search_path {
        return Err(Error::NotSupported(format!(
            "{name} path not configured and PATH search disabled"
        )));
    }
    which::which(name).map_err(|_| Error::NotSupported(format!("{name} not found in PATH")))
}

fn progress_args() -> Vec<String> {
    vec![
        "--newline".into(),
        "--progress".into(),
        "--no-color".into(),
        "--progress-template".into(),
        PROGRESS_TEMPLATE.into(),
        "--progress-delta".into(),
        PROGRESS_DELTA.into(),
    ]
}

/// Format selector and sort order for a selection
pub fn format_args(options: &DownloadOptions) -> Vec<String> {
    match options.track {
        TrackType::AudioOnly => {
            let sort = match options.asr {
                Some(asr) => format!("asr~{asr}"),
                None => "abr".into(),
            };
            vec!["-x".into(), "-f".into(), "ba/best".into(), "-S".into(), sort]
        }
        TrackType::VideoOnly | TrackType::Both => {
            let selector = if options.track == TrackType::VideoOnly {
                "bv"
            } else {
                "bv*+ba/bv+ba/best"
            };
            let res = options
                .height
                .map_or_else(|| "res".to_string(), |h| format!("res:{h}"));
            let fps = options
                .fps
                .map_or_else(|| "fps".to_string(), |f| format!("fps:{f}"));
            vec![
                "-f".into(),
                selector.into(),
                "-S".into(),
                format!("{res},{fps},ext"),
            ]
        }
    }
}
