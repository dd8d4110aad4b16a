//! Test configuration helpers for loading .env settings and creating test engines

use media_queue::{Config, QueueEngine, YtdlpRunnerConfig};
use tempfile::TempDir;

/// Error type for test configuration
#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// URLs used by live tests
///
/// Optional environment variables:
/// - `MEDIA_QUEUE_VIDEO_URL` - Short public video (default: yt-dlp's own test video)
/// - `MEDIA_QUEUE_PLAYLIST_URL` - Small public playlist
#[derive(Debug, Clone)]
pub struct LiveUrls {
    /// Single video
    pub video: String,
    /// Playlist, if configured
    pub playlist: Option<String>,
}

/// Load live test URLs from the environment
pub fn load_live_urls() -> LiveUrls {
    dotenvy::dotenv().ok();

    LiveUrls {
        video: std::env::var("MEDIA_QUEUE_VIDEO_URL")
            .unwrap_or_else(|_| "https://www.youtube.com/watch?v=BaW_jenozKc".to_string()),
        playlist: std::env::var("MEDIA_QUEUE_PLAYLIST_URL").ok(),
    }
}

/// Check whether yt-dlp can be found on this machine
pub fn has_ytdlp() -> bool {
    let config = Config::default();
    YtdlpRunnerConfig::new(config.tools, config.runner)
        .ytdlp_binary()
        .is_ok()
}

/// Create a QueueEngine downloading into a fresh temp directory
///
/// Returns the engine and temp directory (keep temp_dir alive for test duration)
pub fn create_live_engine() -> Result<(QueueEngine, TempDir), ConfigError> {
    let temp_dir = tempfile::tempdir()
        .map_err(|e| ConfigError(format!("Failed to create temp dir: {}", e)))?;

    let mut config = Config::default();
    config.runner.download_dir = temp_dir.path().join("downloads");
    config.limits.max_concurrency = 2;

    let engine = QueueEngine::new(config)
        .map_err(|e| ConfigError(format!("Failed to create engine: {}", e)))?;
    Ok((engine, temp_dir))
}
