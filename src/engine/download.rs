//! Starting downloads, progress and completion

use super::jobs::DownloadJob;
use super::QueueEngine;
use crate::error::{DownloadError, Error, Result};
use crate::formats::resolve_options;
use crate::notify::NotificationParams;
use crate::parsers::ProgressLine;
use crate::progress::Completion;
use crate::state::StateMachine;
use crate::types::{
    DownloadOptions, Event, GroupId, ItemId, LifecycleState, NotificationKind, ProgressStage,
};
use std::collections::HashMap;
use std::sync::atomic::Ordering;

type Headers = Option<HashMap<String, String>>;

/// One member about to be downloaded
struct Planned {
    item_id: ItemId,
    url: String,
    options: DownloadOptions,
}

impl QueueEngine {
    /// Download every downloadable member of a group in `configure`
    ///
    /// `options` are stored for the group and approximated against each
    /// member's available formats.
    pub async fn download_group(&self, id: GroupId, options: DownloadOptions) -> Result<()> {
        self.start_downloads(id, Some(options), "download", |state| {
            state == LifecycleState::Configure
        })
    }

    /// Download every group currently in `configure`
    ///
    /// Returns the number of groups started. Groups that cannot start are
    /// logged and skipped.
    pub async fn download_all(&self, options: DownloadOptions) -> Result<usize> {
        let ready: Vec<GroupId> = self.with_model(|model, _| {
            model
                .store
                .groups()
                .filter(|g| model.states.group_state(g) == Some(LifecycleState::Configure))
                .map(|g| g.id)
                .collect()
        });

        let mut started = 0;
        for id in ready {
            match self.download_group(id, options.clone()).await {
                Ok(()) => started += 1,
                Err(e) => {
                    tracing::warn!(group_id = %id, error = %e, "Skipping group");
                }
            }
        }
        Ok(started)
    }

    /// Set states and schedule one download job per selected member
    ///
    /// With `options` of `None` the group's stored options are reused.
    pub(crate) fn start_downloads(
        &self,
        id: GroupId,
        options: Option<DownloadOptions>,
        operation: &str,
        allowed: fn(LifecycleState) -> bool,
    ) -> Result<()> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let (planned, headers) = self.with_model(|model, fx| -> Result<(Vec<Planned>, Headers)> {
            let group = model
                .store
                .find_group_by_id(id)
                .ok_or(DownloadError::GroupNotFound { id })?;
            let current = model.states.group_state(group);
            let target = LifecycleState::downloading(group.is_combined);
            if !current.is_some_and(|s| allowed(s) && StateMachine::validate_transition(s, target)) {
                return Err(Error::from(DownloadError::InvalidState {
                    id,
                    operation: operation.to_string(),
                    current_state: current.map_or("unknown", |s| s.as_str()).to_string(),
                }));
            }

            let options = match options {
                Some(options) => options,
                None => model.options.get(&id).cloned().unwrap_or_default(),
            };

            let planned: Vec<Planned> = group
                .items
                .iter()
                .filter(|i| i.is_downloadable())
                .filter(|i| {
                    !matches!(
                        model.states.state(i.id),
                        Some(LifecycleState::Done | LifecycleState::Error)
                    )
                })
                .map(|i| Planned {
                    item_id: i.id,
                    url: i.url.clone(),
                    options: resolve_options(&options, &i.formats),
                })
                .collect();
            if planned.is_empty() {
                return Err(DownloadError::NoDownloadableItems { id }.into());
            }

            let combined = group.is_combined;
            let leader = group.leader().map(|l| l.id);
            let headers = group.headers.clone();
            model.options.insert(id, options);

            if combined && let Some(leader) = leader {
                model.set_item_state(id, leader, LifecycleState::DownloadingList, fx);
            }
            for plan in &planned {
                model.progress.reset(plan.item_id, None);
                let sample = model
                    .progress
                    .set_stage(plan.item_id, ProgressStage::Initializing, None);
                model.set_item_state(id, plan.item_id, LifecycleState::Downloading, fx);
                fx.event(Event::ProgressStage {
                    group_id: id,
                    item_id: plan.item_id,
                    stage: sample.stage,
                    category: sample.category,
                });
            }
            Ok((planned, headers))
        })?;

        tracing::info!(group_id = %id, items = planned.len(), operation, "Starting downloads");
        for plan in planned {
            self.spawn_job(
                Some(id),
                DownloadJob::new(
                    self.clone(),
                    id,
                    plan.item_id,
                    plan.url,
                    plan.options,
                    headers.clone(),
                ),
            );
        }
        Ok(())
    }

    /// Apply one parsed line of download output
    pub(crate) fn apply_progress_line(&self, group_id: GroupId, item_id: ItemId, line: ProgressLine) {
        self.with_model(|model, fx| {
            if model.store.find_group_by_id(group_id).is_none() {
                return;
            }
            match line {
                ProgressLine::Progress(update) => {
                    if let Some(sample) = model.progress.record_progress(item_id, update) {
                        fx.event(Event::Progress {
                            group_id,
                            item_id,
                            sample,
                        });
                    }
                }
                ProgressLine::Destination { path, category } => {
                    model.progress.reset(item_id, Some(category));
                    model
                        .destinations
                        .entry(item_id)
                        .or_default()
                        .push(path.clone());
                    fx.event(Event::Destination {
                        group_id,
                        item_id,
                        path,
                    });
                }
                ProgressLine::Stage { stage, category } => {
                    let sample = model.progress.set_stage(item_id, stage, Some(category));
                    fx.event(Event::ProgressStage {
                        group_id,
                        item_id,
                        stage: sample.stage,
                        category: sample.category,
                    });
                }
            }
        });
    }

    /// Mark a downloaded item `done`
    pub(crate) fn complete_item(&self, group_id: GroupId, item_id: ItemId) {
        self.with_model(|model, fx| {
            let Some(group) = model.store.find_group_by_id(group_id) else {
                return;
            };
            if model.states.state(item_id) == Some(LifecycleState::Error) {
                return;
            }
            let item_title = group.item(item_id).and_then(|i| i.title.clone());
            let group_title = group.title.clone();
            let members = group
                .items
                .iter()
                .filter(|i| !i.is_leader && i.is_downloadable())
                .count();
            let leader = group.leader().map(|l| l.id);

            let completion = model.progress.record_complete(item_id, group, &mut model.states);
            if completion == Completion::Ignored {
                return;
            }

            fx.event(Event::Complete { group_id, item_id });
            fx.event(Event::StateChanged {
                group_id,
                item_id,
                state: LifecycleState::Done,
            });
            tracing::info!(group_id = %group_id, item_id = %item_id, "Download complete");

            match completion {
                Completion::ItemFinished => fx.notify(
                    NotificationKind::ItemFinished,
                    NotificationParams {
                        title: item_title,
                        count: 1,
                        message: None,
                    },
                ),
                Completion::PlaylistFinished => {
                    if let Some(leader) = leader {
                        fx.event(Event::StateChanged {
                            group_id,
                            item_id: leader,
                            state: LifecycleState::Done,
                        });
                    }
                    tracing::info!(group_id = %group_id, items = members, "Playlist complete");
                    fx.notify(
                        NotificationKind::PlaylistFinished,
                        NotificationParams {
                            title: group_title,
                            count: members,
                            message: None,
                        },
                    );
                }
                Completion::MemberFinished | Completion::Ignored => {}
            }
        });
    }
}
