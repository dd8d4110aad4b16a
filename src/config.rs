//! Configuration types for media-queue

use crate::types::NotificationKind;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Concurrency and playlist policy limits
///
/// Both values are owned by the host's persistence layer and can be refreshed at
/// runtime through [`QueueEngine::set_max_concurrency`](crate::QueueEngine::set_max_concurrency)
/// and [`QueueEngine::set_split_threshold`](crate::QueueEngine::set_split_threshold).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of tool invocations running at once (default: half the cores, rounded up)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Playlists with fewer entries than this are split into single-item groups,
    /// larger ones are consolidated (default: 50)
    #[serde(default = "default_split_threshold")]
    pub split_threshold: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            split_threshold: default_split_threshold(),
        }
    }
}

/// External tool paths (yt-dlp, ffmpeg)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            search_path: true,
        }
    }
}

/// Settings applied to every tool invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Output directory for downloads (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Proxy URL passed to the extraction tool
    #[serde(default)]
    pub proxy: Option<String>,

    /// User agent override
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Netscape cookie file
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,

    /// Rate limit in the tool's notation (e.g. "2M")
    #[serde(default)]
    pub rate_limit: Option<String>,

    /// Fetch playlists flat (entries only) instead of resolving every entry up front (default: true)
    #[serde(default = "default_true")]
    pub flatten_playlist: bool,

    /// Interrupt a tool that produced no output for this long (default: no timeout)
    #[serde(default, with = "optional_duration_serde")]
    pub liveness_timeout: Option<Duration>,

    /// Time a tool gets to exit after an interrupt before it is killed (default: 5 seconds)
    #[serde(default = "default_stop_grace_period", with = "duration_serde")]
    pub stop_grace_period: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            proxy: None,
            user_agent: None,
            cookies_file: None,
            rate_limit: None,
            flatten_playlist: true,
            liveness_timeout: None,
            stop_grace_period: default_stop_grace_period(),
        }
    }
}

/// Error classification settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Development build: binary-missing errors are expected and not raised
    #[serde(default)]
    pub dev_mode: bool,
}

/// Notification configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook configurations
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// Webhook endpoint notified on queue milestones
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL to POST to
    pub url: String,

    /// Milestones that trigger this webhook
    pub events: Vec<NotificationKind>,

    /// Optional authentication header value
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Timeout for webhook requests (default: 30 seconds)
    #[serde(default = "default_webhook_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Main configuration for QueueEngine
///
/// Fields are organized into logical sub-configs:
/// - [`limits`](LimitsConfig) - concurrency bound and split threshold
/// - [`tools`](ToolsConfig) - external binary paths
/// - [`runner`](RunnerConfig) - per-invocation settings
/// - [`diagnostics`](DiagnosticsConfig) - error classification
/// - [`notifications`](NotificationConfig) - webhooks
///
/// All sub-config fields are flattened, so the serialized form has no nesting.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Concurrency bound and split threshold
    #[serde(flatten)]
    pub limits: LimitsConfig,

    /// External binary paths
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Per-invocation settings
    #[serde(flatten)]
    pub runner: RunnerConfig,

    /// Error classification settings
    #[serde(flatten)]
    pub diagnostics: DiagnosticsConfig,

    /// Notification settings
    #[serde(flatten)]
    pub notifications: NotificationConfig,
}

fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().div_ceil(2))
        .unwrap_or(1)
}

fn default_split_threshold() -> usize {
    50
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_true() -> bool {
    true
}

fn default_stop_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");
        assert!(config.limits.max_concurrency >= 1);
        assert_eq!(config.limits.split_threshold, 50);
        assert!(config.tools.search_path);
        assert!(config.runner.flatten_playlist);
        assert_eq!(config.runner.liveness_timeout, None);
        assert_eq!(config.runner.stop_grace_period, Duration::from_secs(5));
        assert!(!config.diagnostics.dev_mode);
        assert!(config.notifications.webhooks.is_empty());
    }

    #[test]
    fn flattened_fields_deserialize() {
        let json = r#"{
            "max_concurrency": 2,
            "split_threshold": 3,
            "ytdlp_path": "/opt/yt-dlp",
            "liveness_timeout": 90,
            "dev_mode": true,
            "webhooks": [{"url": "http://localhost/hook", "events": ["playlist_finished"]}]
        }"#;
        let config: Config = serde_json::from_str(json).expect("deserialize failed");
        assert_eq!(config.limits.max_concurrency, 2);
        assert_eq!(config.limits.split_threshold, 3);
        assert_eq!(config.tools.ytdlp_path, Some(PathBuf::from("/opt/yt-dlp")));
        assert_eq!(config.runner.liveness_timeout, Some(Duration::from_secs(90)));
        assert!(config.diagnostics.dev_mode);
        let hook = &config.notifications.webhooks[0];
        assert_eq!(hook.events, vec![NotificationKind::PlaylistFinished]);
        assert_eq!(hook.timeout, Duration::from_secs(30));
    }

    #[test]
    fn default_concurrency_is_half_the_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(LimitsConfig::default().max_concurrency, cores.div_ceil(2));
    }
}
