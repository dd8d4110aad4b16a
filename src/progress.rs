//! Per-item progress samples and their group and queue aggregates
//!
//! Samples are merged field by field: a line that only reports speed keeps the
//! last known percentage. Percentage is monotonic per item, so a late or
//! out-of-order line can never move a progress bar backwards. The floor is
//! cleared only by [`ProgressTracker::reset`], which the engine calls when the
//! tool starts a new output file (e.g. the audio stream after the video stream).

use crate::state::StateMachine;
use crate::store::EntityStore;
use crate::types::{
    Group, GroupProgress, ItemId, LifecycleState, ProgressCategory, ProgressSample, ProgressStage,
    ProgressUpdate, QueueProgress,
};
use std::collections::HashMap;

/// Result of recording an item's completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A non-combined group's item finished
    ItemFinished,
    /// The last member of a combined group finished; the group is now `done`
    PlaylistFinished,
    /// A member of a combined group finished, others are still pending
    MemberFinished,
    /// The item was already done
    Ignored,
}

/// Records progress samples per item
#[derive(Debug, Default)]
pub struct ProgressTracker {
    samples: HashMap<ItemId, ProgressSample>,
}

impl ProgressTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `update` into the item's last sample
    ///
    /// Returns the merged sample, or `None` when the update was discarded because
    /// its percentage is below the last recorded one.
    pub fn record_progress(
        &mut self,
        item: ItemId,
        update: ProgressUpdate,
    ) -> Option<ProgressSample> {
        let sample = self.samples.entry(item).or_default();

        if let (Some(new), Some(old)) = (update.percentage, sample.percentage)
            && new < old
        {
            tracing::trace!(item_id = %item, new, old, "Discarding regressing progress sample");
            return None;
        }

        if let Some(category) = update.category {
            sample.category = category;
        }
        sample.percentage = update.percentage.or(sample.percentage);
        sample.speed_bps = update.speed_bps.or(sample.speed_bps);
        sample.eta_secs = update.eta_secs.or(sample.eta_secs);
        sample.downloaded_bytes = update.downloaded_bytes.or(sample.downloaded_bytes);
        sample.total_bytes = update.total_bytes.or(sample.total_bytes);

        Some(sample.clone())
    }

    /// Update only the stage (and category, if given) of an item
    pub fn set_stage(
        &mut self,
        item: ItemId,
        stage: ProgressStage,
        category: Option<ProgressCategory>,
    ) -> ProgressSample {
        let sample = self.samples.entry(item).or_default();
        sample.stage = stage;
        if let Some(category) = category {
            sample.category = category;
        }
        sample.clone()
    }

    /// Clear the numeric fields of an item, lifting the monotonic floor
    pub fn reset(&mut self, item: ItemId, category: Option<ProgressCategory>) {
        let sample = self.samples.entry(item).or_default();
        sample.percentage = None;
        sample.speed_bps = None;
        sample.eta_secs = None;
        sample.downloaded_bytes = None;
        sample.total_bytes = None;
        if let Some(category) = category {
            sample.category = category;
        }
    }

    /// Last sample of an item
    pub fn sample(&self, item: ItemId) -> Option<&ProgressSample> {
        self.samples.get(&item)
    }

    /// Forget an item
    pub fn remove(&mut self, item: ItemId) -> Option<ProgressSample> {
        self.samples.remove(&item)
    }

    /// Mark an item `done` and check whether its group finished
    ///
    /// For a combined group the group is marked `done` once every non-leader
    /// available member is settled (`done` or `error`); this reports
    /// [`Completion::PlaylistFinished`] exactly once.
    pub fn record_complete(
        &mut self,
        item: ItemId,
        group: &Group,
        states: &mut StateMachine,
    ) -> Completion {
        if states.set_state(item, LifecycleState::Done) == Some(LifecycleState::Done) {
            return Completion::Ignored;
        }
        if let Some(sample) = self.samples.get_mut(&item) {
            sample.speed_bps = None;
            sample.eta_secs = None;
        }

        if !group.is_combined {
            return Completion::ItemFinished;
        }

        let all_settled = group
            .items
            .iter()
            .filter(|i| !i.is_leader && !i.unavailable)
            .all(|i| {
                matches!(
                    states.state(i.id),
                    Some(LifecycleState::Done | LifecycleState::Error)
                )
            });
        let leader_done = states.group_state(group) == Some(LifecycleState::Done);

        if all_settled && !leader_done {
            states.set_group_state(group, LifecycleState::Done);
            Completion::PlaylistFinished
        } else {
            Completion::MemberFinished
        }
    }

    /// Progress summary for one group
    ///
    /// A combined group is measured over its members, excluding the leader.
    /// Returns `None` for a group without members to measure.
    pub fn group_progress(&self, group: &Group, states: &StateMachine) -> Option<GroupProgress> {
        let ids: Vec<ItemId> = group
            .items
            .iter()
            .filter(|i| !group.is_combined || !i.is_leader)
            .map(|i| i.id)
            .collect();
        if ids.is_empty() {
            return None;
        }

        let speed_bps = ids
            .iter()
            .filter_map(|id| self.samples.get(id))
            .filter_map(|s| s.speed_bps)
            .sum();

        let count = |pred: fn(LifecycleState) -> bool| {
            ids.iter()
                .filter(|id| states.state(**id).is_some_and(pred))
                .count()
        };
        let done = count(|s| s == LifecycleState::Done);
        let downloading = count(|s| s.is_downloading());
        let mut ready = count(|s| s == LifecycleState::Configure);
        let total = if downloading > 0 {
            downloading + done
        } else {
            ready + done
        };

        // Discovery still running: do not show a partial ready count
        if group.items.len() > 1 && downloading == 0 && !group.is_combined {
            ready = 0;
        }

        let active: Vec<f64> = ids
            .iter()
            .filter_map(|id| match states.state(*id) {
                Some(LifecycleState::Done) => Some(100.0),
                Some(s) if s.is_downloading() || s.is_paused() => Some(
                    self.samples
                        .get(id)
                        .and_then(|s| s.percentage)
                        .unwrap_or(0.0),
                ),
                _ => None,
            })
            .collect();
        let percentage = if active.is_empty() {
            0.0
        } else {
            active.iter().sum::<f64>() / active.len() as f64
        };

        Some(GroupProgress {
            group_id: group.id,
            speed_bps,
            ready,
            downloading,
            done,
            total,
            percentage,
        })
    }

    /// Progress summary across every group
    pub fn aggregate_progress(&self, store: &EntityStore, states: &StateMachine) -> QueueProgress {
        let mut progress = QueueProgress::default();
        for group in store.groups() {
            if let Some(gp) = self.group_progress(group, states) {
                progress.ready += gp.ready;
                progress.done += gp.done;
                progress.downloading += gp.downloading;
            }
        }
        progress.total = if progress.downloading > 0 {
            progress.downloading + progress.done
        } else {
            progress.ready + progress.done
        };
        progress
    }
}
