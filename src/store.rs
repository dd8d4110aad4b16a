//! Entity store for groups and their items
//!
//! The store is plain data. It keeps groups in creation order and enforces the
//! structural invariants of a single group (members point back to their group).
//! Counter and leader bookkeeping during ingestion lives in the engine, since it
//! has to move together with state and notifications.

use crate::types::{Group, GroupId, Item, ItemId};
use std::collections::HashMap;

/// Owner of every [`Group`] and [`Item`] known to the engine
#[derive(Debug, Default)]
pub struct EntityStore {
    groups: HashMap<GroupId, Group>,
    order: Vec<GroupId>,
}

impl EntityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a group, replacing any group with the same id
    ///
    /// Members are re-pointed at the group's id.
    pub fn create_group(&mut self, mut group: Group) -> GroupId {
        let id = group.id;
        for item in &mut group.items {
            item.group_id = id;
        }
        if self.groups.insert(id, group).is_none() {
            self.order.push(id);
        }
        id
    }

    /// Remove a group and all its items
    ///
    /// State held by other components is left alone; callers cascade.
    pub fn delete_group(&mut self, id: GroupId) -> Option<Group> {
        let removed = self.groups.remove(&id)?;
        self.order.retain(|g| *g != id);
        Some(removed)
    }

    /// Look up a group
    pub fn find_group_by_id(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// Look up a group mutably
    pub fn find_group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(&id)
    }

    /// Look up an item within a group
    pub fn find_item_in_group(&self, group_id: GroupId, item_id: ItemId) -> Option<&Item> {
        self.groups.get(&group_id)?.item(item_id)
    }

    /// The group's leader item
    pub fn find_group_leader(&self, group_id: GroupId) -> Option<&Item> {
        self.groups.get(&group_id)?.leader()
    }

    /// Find which group currently owns an item
    pub fn find_group_of_item(&self, item_id: ItemId) -> Option<GroupId> {
        self.order
            .iter()
            .copied()
            .find(|g| self.groups.get(g).is_some_and(|g| g.item(item_id).is_some()))
    }

    /// All groups in creation order
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.order.iter().filter_map(|id| self.groups.get(id))
    }

    /// Ids of all groups in creation order
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.order.clone()
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the store holds no groups
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
