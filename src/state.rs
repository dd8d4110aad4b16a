//! Lifecycle state per item, with group state derived from the leader

use crate::types::{Group, ItemId, LifecycleState};
use std::collections::HashMap;

/// Holds exactly one [`LifecycleState`] per tracked item
///
/// An item without an entry is unknown to the state machine.
#[derive(Debug, Default)]
pub struct StateMachine {
    states: HashMap<ItemId, LifecycleState>,
}

impl StateMachine {
    /// Create an empty state machine
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state of one item, returning the previous state
    pub fn set_state(&mut self, item: ItemId, state: LifecycleState) -> Option<LifecycleState> {
        self.states.insert(item, state)
    }

    /// State of one item
    pub fn state(&self, item: ItemId) -> Option<LifecycleState> {
        self.states.get(&item).copied()
    }

    /// Stop tracking an item
    pub fn remove(&mut self, item: ItemId) -> Option<LifecycleState> {
        self.states.remove(&item)
    }

    /// Set the state of a whole group
    ///
    /// A combined group is represented by its leader, so only the leader changes.
    /// Any other group moves every member in lock-step, except unavailable markers.
    /// Returns the items whose state was written.
    pub fn set_group_state(&mut self, group: &Group, state: LifecycleState) -> Vec<ItemId> {
        let targets: Vec<ItemId> = if group.is_combined {
            group.leader().map(|l| l.id).into_iter().collect()
        } else {
            group
                .items
                .iter()
                .filter(|i| !i.unavailable)
                .map(|i| i.id)
                .collect()
        };
        for id in &targets {
            self.states.insert(*id, state);
        }
        targets
    }

    /// State of a group, read from its leader
    pub fn group_state(&self, group: &Group) -> Option<LifecycleState> {
        self.state(group.leader()?.id)
    }

    /// Whether `from -> to` is a legal lifecycle transition
    pub fn validate_transition(from: LifecycleState, to: LifecycleState) -> bool {
        use LifecycleState::*;
        match (from, to) {
            (Fetching, FetchingList | Configure | Error) => true,
            (FetchingList, Configure | Error) => true,
            (Configure, Downloading | DownloadingList | Error) => true,
            (Downloading | DownloadingList, Paused | PausedList | Error | Done) => true,
            (Paused | PausedList, Downloading | DownloadingList | Error) => true,
            _ => false,
        }
    }

    /// Number of tracked items
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no item is tracked
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
