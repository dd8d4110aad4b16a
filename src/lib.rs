//! # media-queue
//!
//! Queue orchestration engine for media downloaders built on yt-dlp and ffmpeg.
//!
//! ## Design Philosophy
//!
//! media-queue is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Pluggable** - Tool invocation, notifications and telemetry sit behind traits
//! - **Bounded** - Every tool run shares one concurrency limit, fair across groups
//!
//! A submitted URL becomes a *group*. Its metadata is fetched, playlists are
//! expanded entry by entry and then either split into single-item groups or
//! consolidated into one combined group. Groups in `configure` can be
//! downloaded, paused, resumed and deleted.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_queue::{Config, DownloadOptions, Event, QueueEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = QueueEngine::new(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     let id = engine.submit_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ", None).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let Event::StateChanged { group_id, state, .. } = event
//!             && group_id == id
//!             && state == media_queue::LifecycleState::Configure
//!         {
//!             engine.download_group(id, DownloadOptions::default()).await?;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Tool output classification
pub mod diagnostics;
/// Queue engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Format selection and aggregation
pub mod formats;
/// Units of work run under the concurrency limit
pub mod job;
/// Keyed, fair concurrency limiter
pub mod limiter;
/// Notification and telemetry seams
pub mod notify;
/// Tool output parsers
pub mod parsers;
/// Playlist split/consolidate policy
pub mod policy;
/// Progress tracking and aggregation
pub mod progress;
/// External process execution
pub mod runner;
/// Lifecycle state machine
pub mod state;
/// Group and item storage
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use diagnostics::{Classification, Classifier};
pub use engine::{INTERNAL_CODE, QueueEngine};
pub use error::{DownloadError, Error, Result};
pub use notify::{
    NoOpNotifier, NoOpTelemetry, NotificationDispatcher, NotificationParams, TelemetrySink,
    WebhookNotifier,
};
pub use runner::{Invocation, RunnerConfigProvider, ToolRequest, YtdlpRunnerConfig};
pub use types::{
    Diagnostic, DownloadOptions, Event, Fatal, Group, GroupId, GroupProgress, Item, ItemId,
    LifecycleState, MediaFormat, NotificationKind, ProgressSample, QueueProgress, TrackType,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_queue::{Config, QueueEngine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = QueueEngine::new(Config::default())?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: QueueEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

/// Wait for SIGTERM or SIGINT, degrading to whichever handler could be installed
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = signal(SignalKind::terminate());
    let interrupt = signal(SignalKind::interrupt());

    let received = match (terminate, interrupt) {
        (Ok(mut terminate), Ok(mut interrupt)) => tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        },
        (Ok(mut terminate), Err(e)) => {
            tracing::warn!(error = %e, "SIGINT handler unavailable, queue stops on SIGTERM only");
            terminate.recv().await;
            "SIGTERM"
        }
        (Err(e), Ok(mut interrupt)) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, queue stops on SIGINT only");
            interrupt.recv().await;
            "SIGINT"
        }
        (Err(term_err), Err(int_err)) => {
            tracing::error!(
                sigterm_error = %term_err,
                sigint_error = %int_err,
                "No signal handler could be installed, falling back to ctrl_c"
            );
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "ctrl_c listener failed, stopping queue now");
            }
            "ctrl_c"
        }
    };
    tracing::info!(signal = received, "Stopping media queue");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl_c", "Stopping media queue"),
        Err(e) => tracing::error!(error = %e, "ctrl_c listener failed, stopping queue now"),
    }
}
