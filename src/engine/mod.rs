//! Queue engine split into focused submodules.
//!
//! The `QueueEngine` struct and its methods are organized by domain:
//! - [`ingest`] - URL submission, metadata ingestion and playlist finalization
//! - [`download`] - Starting downloads, progress and completion
//! - [`control`] - Pause, resume and deletion of groups
//! - [`size`] - Size estimates per selection
//! - [`report`] - Fatal errors, diagnostics and telemetry
//! - [`config_ops`] - Runtime configuration updates
//! - [`lifecycle`] - Shutdown coordination
//! - [`jobs`] - The tool invocations scheduled by the engine
//!
//! Every public operation is `async`, including those that currently finish
//! without awaiting (`download_group`, `resume_group`, `cancel_group`,
//! `delete_group`). Their work happens under the model lock and in spawned
//! jobs; the signatures stay `async` so callers are unaffected if an
//! operation later needs to await.

mod config_ops;
mod control;
mod download;
mod ingest;
mod jobs;
mod lifecycle;
mod report;
mod size;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use report::INTERNAL_CODE;

use crate::config::Config;
use crate::diagnostics::{Classifier, ErrorDefinitions};
use crate::error::Result;
use crate::job::Job;
use crate::limiter::Limiter;
use crate::notify::{
    NoOpNotifier, NoOpTelemetry, NotificationDispatcher, NotificationParams, TelemetrySink,
    WebhookNotifier,
};
use crate::progress::ProgressTracker;
use crate::runner::{RunnerConfigProvider, YtdlpRunnerConfig};
use crate::state::StateMachine;
use crate::store::EntityStore;
use crate::types::{
    Diagnostic, DownloadOptions, Event, Fatal, Group, GroupId, GroupProgress, ItemId,
    LifecycleState, NotificationKind, ProgressSample, QueueProgress,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything the engine knows about the queue
///
/// Guarded by one mutex that is never held across an `.await`.
#[derive(Debug)]
pub(crate) struct Model {
    /// Groups and items
    pub(crate) store: EntityStore,
    /// Lifecycle state per item
    pub(crate) states: StateMachine,
    /// Progress per item
    pub(crate) progress: ProgressTracker,
    /// Last fatal per item
    pub(crate) fatals: HashMap<ItemId, Fatal>,
    /// Warnings per item
    pub(crate) diagnostics: HashMap<ItemId, Vec<Diagnostic>>,
    /// Output files per item
    pub(crate) destinations: HashMap<ItemId, Vec<PathBuf>>,
    /// Size cache keyed by item and resolved selection
    pub(crate) sizes: HashMap<(ItemId, DownloadOptions), u64>,
    /// Selection last used to download each group
    pub(crate) options: HashMap<GroupId, DownloadOptions>,
    /// Playlists below this many entries are split
    pub(crate) split_threshold: usize,
}

impl Model {
    fn new(split_threshold: usize) -> Self {
        Self {
            store: EntityStore::new(),
            states: StateMachine::new(),
            progress: ProgressTracker::new(),
            fatals: HashMap::new(),
            diagnostics: HashMap::new(),
            destinations: HashMap::new(),
            sizes: HashMap::new(),
            options: HashMap::new(),
            split_threshold,
        }
    }

    /// Set one item's state, recording the change
    pub(crate) fn set_item_state(
        &mut self,
        group_id: GroupId,
        item_id: ItemId,
        state: LifecycleState,
        fx: &mut Effects,
    ) {
        if self.states.set_state(item_id, state) != Some(state) {
            fx.event(Event::StateChanged {
                group_id,
                item_id,
                state,
            });
        }
    }

    /// Set a group's state (leader only when combined, else lock-step)
    pub(crate) fn set_group_state(&mut self, group_id: GroupId, state: LifecycleState, fx: &mut Effects) {
        let Some(group) = self.store.find_group_by_id(group_id) else {
            return;
        };
        let changed: Vec<ItemId> = group
            .items
            .iter()
            .filter(|i| self.states.state(i.id) != Some(state))
            .map(|i| i.id)
            .collect();
        for item_id in self.states.set_group_state(group, state) {
            if changed.contains(&item_id) {
                fx.event(Event::StateChanged {
                    group_id,
                    item_id,
                    state,
                });
            }
        }
    }
}

/// Side effects collected under the model lock and applied after it is released
#[derive(Debug, Default)]
pub(crate) struct Effects {
    events: Vec<Event>,
    notifications: Vec<(NotificationKind, NotificationParams)>,
    reports: Vec<(String, String, serde_json::Value)>,
}

impl Effects {
    pub(crate) fn event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub(crate) fn notify(&mut self, kind: NotificationKind, params: NotificationParams) {
        self.notifications.push((kind, params));
    }

    pub(crate) fn report(&mut self, code: &str, message: &str, context: serde_json::Value) {
        self.reports
            .push((code.to_string(), message.to_string(), context));
    }
}

/// Pluggable collaborators of the engine
#[derive(Clone)]
pub(crate) struct Collaborators {
    /// Builds tool invocations
    pub(crate) runner_config: Arc<dyn RunnerConfigProvider>,
    /// Receives milestones
    pub(crate) notifier: Arc<dyn NotificationDispatcher>,
    /// Receives unexpected errors
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
}

/// Main engine instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct QueueEngine {
    /// Queue state
    pub(crate) model: Arc<Mutex<Model>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Bounded, keyed scheduling of tool invocations
    pub(crate) limiter: Arc<Limiter>,
    /// Tool output classification
    pub(crate) classifier: Arc<Classifier>,
    /// Runner configuration, notifications and telemetry
    pub(crate) collaborators: Collaborators,
    /// Whether new URLs are accepted (false once shutdown started)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl QueueEngine {
    /// Create an engine with the default collaborators
    ///
    /// Tool invocations target yt-dlp as configured in `config.tools` and
    /// `config.runner`. Notifications go to the configured webhooks, if any.
    /// Telemetry is disabled.
    pub fn new(config: Config) -> Result<Self> {
        let runner_config = Arc::new(YtdlpRunnerConfig::new(
            config.tools.clone(),
            config.runner.clone(),
        ));
        let notifier: Arc<dyn NotificationDispatcher> = if config.notifications.webhooks.is_empty() {
            Arc::new(NoOpNotifier)
        } else {
            Arc::new(WebhookNotifier::new(&config.notifications))
        };
        Self::with_collaborators(config, runner_config, notifier, Arc::new(NoOpTelemetry))
    }

    /// Create an engine with custom collaborators
    pub fn with_collaborators(
        config: Config,
        runner_config: Arc<dyn RunnerConfigProvider>,
        notifier: Arc<dyn NotificationDispatcher>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let limiter = Limiter::new(config.limits.max_concurrency)?;
        let classifier = Classifier::new(ErrorDefinitions::builtin()?, config.diagnostics.dev_mode);

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        tracing::info!(
            max_concurrency = config.limits.max_concurrency,
            split_threshold = config.limits.split_threshold,
            dev_mode = config.diagnostics.dev_mode,
            "Queue engine initialized"
        );

        Ok(Self {
            model: Arc::new(Mutex::new(Model::new(config.limits.split_threshold))),
            event_tx,
            config: Arc::new(config),
            limiter: Arc::new(limiter),
            classifier: Arc::new(classifier),
            collaborators: Collaborators {
                runner_config,
                notifier,
                telemetry,
            },
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Subscribe to queue events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Having no subscribers is not an error.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn lock(&self) -> MutexGuard<'_, Model> {
        self.model.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the model, then apply the effects it collected
    pub(crate) fn with_model<R>(&self, f: impl FnOnce(&mut Model, &mut Effects) -> R) -> R {
        let mut fx = Effects::default();
        let result = {
            let mut model = self.lock();
            f(&mut model, &mut fx)
        };
        self.flush(fx);
        result
    }

    fn flush(&self, fx: Effects) {
        for event in fx.events {
            self.emit_event(event);
        }
        for (kind, params) in fx.notifications {
            self.collaborators.notifier.notify(kind, params, false);
        }
        for (code, message, context) in fx.reports {
            self.collaborators.telemetry.report(&code, &message, context);
        }
    }

    /// Schedule `job` on the limiter in a background task
    pub(crate) fn spawn_job<J>(&self, key: Option<GroupId>, mut job: J)
    where
        J: Job + 'static,
    {
        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let key = key.map(|k| k.to_string());
            let kind = job.kind();
            if let Err(e) = limiter.schedule(key.as_deref(), &mut job).await {
                tracing::warn!(key = ?key, kind = kind.as_str(), error = %e, "Job failed");
            }
        });
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        self.config.clone()
    }

    /// A snapshot of a group
    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.lock().store.find_group_by_id(id).cloned()
    }

    /// Snapshots of all groups in creation order
    pub fn groups(&self) -> Vec<Group> {
        self.lock().store.groups().cloned().collect()
    }

    /// Lifecycle state of an item
    pub fn item_state(&self, item: ItemId) -> Option<LifecycleState> {
        self.lock().states.state(item)
    }

    /// Lifecycle state of a group (its leader's state)
    pub fn group_state(&self, id: GroupId) -> Option<LifecycleState> {
        let model = self.lock();
        let group = model.store.find_group_by_id(id)?;
        model.states.group_state(group)
    }

    /// Progress summary of a group
    pub fn group_progress(&self, id: GroupId) -> Option<GroupProgress> {
        let model = self.lock();
        let group = model.store.find_group_by_id(id)?;
        model.progress.group_progress(group, &model.states)
    }

    /// Progress summary across the queue
    pub fn aggregate_progress(&self) -> QueueProgress {
        let model = self.lock();
        model.progress.aggregate_progress(&model.store, &model.states)
    }

    /// Last progress sample of an item
    pub fn item_progress(&self, item: ItemId) -> Option<ProgressSample> {
        self.lock().progress.sample(item).cloned()
    }

    /// The fatal that ended an item, if any
    pub fn fatal(&self, item: ItemId) -> Option<Fatal> {
        self.lock().fatals.get(&item).cloned()
    }

    /// Warnings recorded for an item
    pub fn diagnostics(&self, item: ItemId) -> Vec<Diagnostic> {
        self.lock()
            .diagnostics
            .get(&item)
            .cloned()
            .unwrap_or_default()
    }

    /// Files the tool wrote for an item
    pub fn destinations(&self, item: ItemId) -> Vec<PathBuf> {
        self.lock()
            .destinations
            .get(&item)
            .cloned()
            .unwrap_or_default()
    }
}
