//! Error types for media-queue
//!
//! Library operations return [`Result`]. Failures of the external tools are not
//! errors at this level: they are classified into [`Fatal`](crate::types::Fatal)
//! records and surfaced through events. The types here cover misuse of the API
//! (unknown ids, illegal transitions), configuration problems and failures of
//! the orchestration layer itself (a binary that cannot be spawned, I/O).

use crate::types::{GroupId, ItemId};
use thiserror::Error;

/// Result type alias for media-queue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-queue
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrency")
        key: Option<String>,
    },

    /// Queue operation error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Submitted URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Requested entity not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool could not be executed (yt-dlp, ffmpeg)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, no telemetry backend, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised by queue operations on groups and items
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Group not found in the store
    #[error("group {id} not found")]
    GroupNotFound {
        /// The group ID that was not found
        id: GroupId,
    },

    /// Item not found in the store
    #[error("item {id} not found")]
    ItemNotFound {
        /// The item ID that was not found
        id: ItemId,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} group {id} in state {current_state}")]
    InvalidState {
        /// The group that is in an invalid state for the operation
        id: GroupId,
        /// The operation that was attempted (e.g., "download", "resume")
        operation: String,
        /// The current state that prevents the operation (e.g., "fetchingList", "done")
        current_state: String,
    },

    /// Group holds nothing that can be downloaded
    #[error("group {id} has no downloadable items")]
    NoDownloadableItems {
        /// The group without downloadable members
        id: GroupId,
    },
}

impl Error {
    /// Machine-readable error code
    ///
    /// Used as the code of internal fatals synthesized from orchestration failures.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Download(DownloadError::GroupNotFound { .. })
            | Error::Download(DownloadError::ItemNotFound { .. })
            | Error::NotFound(_) => "not_found",
            Error::Download(DownloadError::InvalidState { .. }) => "invalid_state",
            Error::Download(DownloadError::NoDownloadableItems { .. }) => "no_downloadable_items",
            Error::Io(_) => "io_error",
            Error::InvalidUrl(_) => "invalid_url",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
            Error::Other(_) => "internal_error",
        }
    }
}
