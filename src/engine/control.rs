//! Pause, resume and deletion of groups

use super::QueueEngine;
use crate::error::{DownloadError, Result};
use crate::state::StateMachine;
use crate::types::{Event, GroupId, ItemId, LifecycleState};

impl QueueEngine {
    /// Pause a downloading group
    ///
    /// Running downloads of the group are interrupted and queued ones are
    /// never started. Members still downloading move to `paused` (the leader
    /// of a combined group to `pausedList`). Other groups are unaffected.
    pub async fn cancel_group(&self, id: GroupId) -> Result<()> {
        self.with_model(|model, fx| -> Result<()> {
            let group = model
                .store
                .find_group_by_id(id)
                .ok_or(DownloadError::GroupNotFound { id })?;
            let current = model.states.group_state(group);
            let target = LifecycleState::paused(group.is_combined);
            if !current.is_some_and(|s| StateMachine::validate_transition(s, target)) {
                return Err(DownloadError::InvalidState {
                    id,
                    operation: "cancel".to_string(),
                    current_state: current.map_or("unknown", |s| s.as_str()).to_string(),
                }
                .into());
            }

            let leader = group.is_combined.then(|| group.leader().map(|l| l.id)).flatten();
            let live: Vec<ItemId> = group
                .items
                .iter()
                .filter(|i| Some(i.id) != leader)
                .filter(|i| model.states.state(i.id) == Some(LifecycleState::Downloading))
                .map(|i| i.id)
                .collect();

            if let Some(leader) = leader {
                model.set_item_state(id, leader, LifecycleState::PausedList, fx);
            }
            for item_id in live {
                model.set_item_state(id, item_id, LifecycleState::Paused, fx);
            }
            Ok(())
        })?;

        self.limiter.cancel_key(&id.to_string());
        tracing::info!(group_id = %id, "Group paused");
        Ok(())
    }

    /// Resume a paused group
    ///
    /// Members that ended neither `done` nor `error` are downloaded again with
    /// the options the group was last downloaded with.
    pub async fn resume_group(&self, id: GroupId) -> Result<()> {
        self.start_downloads(id, None, "resume", |state| state.is_paused())
    }

    /// Remove a group and everything recorded for it
    ///
    /// Running jobs of the group are interrupted; their late output is ignored.
    pub async fn delete_group(&self, id: GroupId) -> Result<()> {
        let items = self.with_model(|model, fx| -> Result<usize> {
            let group = model
                .store
                .delete_group(id)
                .ok_or(DownloadError::GroupNotFound { id })?;
            for item in &group.items {
                model.states.remove(item.id);
                model.progress.remove(item.id);
                model.fatals.remove(&item.id);
                model.diagnostics.remove(&item.id);
                model.destinations.remove(&item.id);
            }
            model
                .sizes
                .retain(|(item_id, _), _| group.item(*item_id).is_none());
            model.options.remove(&id);
            fx.event(Event::GroupDeleted { group_id: id });
            Ok(group.items.len())
        })?;

        let key = id.to_string();
        self.limiter.cancel_key(&key);
        self.limiter.release_key(&key);
        tracing::info!(group_id = %id, items, "Group deleted");
        Ok(())
    }

    /// Remove every group
    ///
    /// Returns the number of groups deleted.
    pub async fn delete_all(&self) -> Result<usize> {
        let ids = self.with_model(|model, _| model.store.group_ids());
        let mut deleted = 0;
        for id in ids {
            match self.delete_group(id).await {
                Ok(()) => deleted += 1,
                // Removed concurrently (e.g. by a playlist split)
                Err(e) => tracing::debug!(group_id = %id, error = %e, "Group already gone"),
            }
        }
        Ok(deleted)
    }
}

