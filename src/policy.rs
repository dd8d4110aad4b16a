//! Playlist finalization: split or consolidate
//!
//! Once every entry of a playlist group has been fetched the group is
//! finalized exactly once. Small playlists are split into independent
//! single-item groups; large ones are consolidated into one combined group
//! represented by its leader.

use crate::error::{DownloadError, Result};
use crate::formats::{merge_codecs, merge_formats};
use crate::state::StateMachine;
use crate::store::EntityStore;
use crate::types::{Group, GroupId, Item, LifecycleState, NotificationKind};

/// Result of finalizing a playlist group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    /// The group was replaced by single-item groups
    Split {
        /// Removed playlist group
        from: GroupId,
        /// New groups, in playlist order
        into: Vec<GroupId>,
    },
    /// The group was turned into a combined group
    Consolidated {
        /// The combined group
        group: GroupId,
        /// Number of downloadable members
        items: usize,
    },
}

impl Finalized {
    /// Notification to send, with the count it carries
    pub fn notification(&self) -> (NotificationKind, usize) {
        match self {
            Finalized::Split { into, .. } => (NotificationKind::ItemReady, into.len()),
            Finalized::Consolidated { items, .. } => (NotificationKind::PlaylistReady, *items),
        }
    }
}

/// Split or consolidate the playlist group `group_id`
///
/// Groups with fewer than `split_threshold` expected entries are split.
/// A playlist without any downloadable entry is left untouched and
/// [`DownloadError::NoDownloadableItems`] is returned.
pub fn finalize(
    store: &mut EntityStore,
    states: &mut StateMachine,
    group_id: GroupId,
    split_threshold: usize,
) -> Result<Finalized> {
    let group = store
        .find_group_by_id(group_id)
        .ok_or(DownloadError::GroupNotFound { id: group_id })?;
    if !group.items.iter().any(Item::is_downloadable) {
        return Err(DownloadError::NoDownloadableItems { id: group_id }.into());
    }
    let total = group.total;

    if total < split_threshold {
        split(store, states, group_id)
    } else {
        consolidate(store, states, group_id)
    }
}

fn split(store: &mut EntityStore, states: &mut StateMachine, group_id: GroupId) -> Result<Finalized> {
    let group = store
        .delete_group(group_id)
        .ok_or(DownloadError::GroupNotFound { id: group_id })?;

    let entries: Vec<String> = group
        .items
        .iter()
        .find_map(|i| i.entries.clone())
        .unwrap_or_default();
    let position = |item: &Item| {
        entries
            .iter()
            .position(|url| *url == item.url)
            .unwrap_or(usize::MAX)
    };

    let (mut members, dropped): (Vec<Item>, Vec<Item>) = group
        .items
        .into_iter()
        .partition(|i| i.is_downloadable());
    for item in dropped {
        states.remove(item.id);
    }
    members.sort_by_key(position);

    let into: Vec<GroupId> = members
        .into_iter()
        .map(|item| {
            let item_id = item.id;
            let id = store.create_group(Group::from_single(item, group.headers.clone()));
            states.set_state(item_id, LifecycleState::Configure);
            id
        })
        .collect();

    tracing::info!(group_id = %group_id, groups = into.len(), "Split playlist");
    Ok(Finalized::Split {
        from: group_id,
        into,
    })
}

fn consolidate(
    store: &mut EntityStore,
    states: &mut StateMachine,
    group_id: GroupId,
) -> Result<Finalized> {
    let group = store
        .find_group_mut(group_id)
        .ok_or(DownloadError::GroupNotFound { id: group_id })?;
    if group.items.is_empty() {
        return Err(DownloadError::NoDownloadableItems { id: group_id }.into());
    }

    let mut duration = 0.0;
    let mut size: Option<u64> = None;
    let mut audio_codecs = Vec::new();
    let mut formats = Vec::new();
    let mut members = 0;
    for item in group.items.iter().skip(1).filter(|i| i.is_downloadable()) {
        members += 1;
        duration += item.duration.unwrap_or(0.0);
        if let Some(s) = item.size {
            size = Some(size.unwrap_or(0) + s);
        }
        merge_codecs(&mut audio_codecs, &item.audio_codecs);
        merge_formats(&mut formats, &item.formats);
    }

    for (index, item) in group.items.iter_mut().enumerate() {
        item.is_leader = index == 0;
    }
    let leader = &mut group.items[0];
    leader.duration = Some(duration);
    leader.size = size;
    leader.audio_codecs = audio_codecs;
    leader.formats = formats;
    let leader = leader.clone();
    group.copy_leader_metadata(&leader);
    group.is_combined = true;

    states.set_state(leader.id, LifecycleState::Configure);
    for item in group.items.iter().skip(1).filter(|i| i.is_downloadable()) {
        states.set_state(item.id, LifecycleState::Configure);
    }

    tracing::info!(group_id = %group_id, items = members, "Consolidated playlist");
    Ok(Finalized::Consolidated {
        group: group_id,
        items: members,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaFormat;

    fn format(id: &str, height: u32, fps: u32) -> MediaFormat {
        MediaFormat {
            id: id.into(),
            height: Some(height),
            fps: Some(fps),
            ..Default::default()
        }
    }

    /// Playlist group with a descriptor leader and the given members
    fn playlist(urls: &[&str], members: Vec<Item>) -> Group {
        let mut group = Group::with_placeholder("https://example.com/list");
        let leader = &mut group.items[0];
        leader.placeholder = false;
        leader.title = Some("List".into());
        leader.entries = Some(urls.iter().map(|u| u.to_string()).collect());
        group.total = urls.len();
        group.processed = members.len();
        group.items.extend(members);
        group
    }

    fn member(url: &str, duration: f64, codecs: &[&str], formats: Vec<MediaFormat>) -> Item {
        let mut item = Item::new(GroupId::new(), url);
        item.title = Some(url.to_string());
        item.duration = Some(duration);
        item.size = Some(100);
        item.audio_codecs = codecs.iter().map(|c| c.to_string()).collect();
        item.formats = formats;
        item
    }

    fn setup(group: Group) -> (EntityStore, StateMachine, GroupId) {
        let mut store = EntityStore::new();
        let mut states = StateMachine::new();
        for item in &group.items {
            let state = if item.unavailable {
                LifecycleState::Error
            } else {
                LifecycleState::FetchingList
            };
            states.set_state(item.id, state);
        }
        let id = store.create_group(group);
        (store, states, id)
    }

    #[test]
    fn small_playlist_is_split_in_playlist_order() {
        let group = playlist(
            &["u1", "u2", "u3"],
            vec![
                member("u2", 1.0, &[], vec![]),
                Item::unavailable(GroupId::new(), "u3"),
                member("u1", 1.0, &[], vec![]),
            ],
        );
        let descriptor = group.items[0].id;
        let (mut store, mut states, id) = setup(group);

        let result = finalize(&mut store, &mut states, id, 50).unwrap();
        let Finalized::Split { from, into } = &result else {
            panic!("expected split");
        };
        assert_eq!(*from, id);
        assert_eq!(into.len(), 2);
        assert!(store.find_group_by_id(id).is_none());
        assert!(states.state(descriptor).is_none());
        assert_eq!(result.notification(), (NotificationKind::ItemReady, 2));

        let urls: Vec<_> = into
            .iter()
            .map(|g| store.find_group_leader(*g).unwrap().url.clone())
            .collect();
        assert_eq!(urls, vec!["u1", "u2"]);

        for g in into {
            let group = store.find_group_by_id(*g).unwrap();
            assert_eq!(group.total, 1);
            assert_eq!(group.processed, 1);
            assert!(!group.is_combined);
            let leader = group.leader().unwrap();
            assert_eq!(leader.group_id, *g);
            assert_eq!(states.state(leader.id), Some(LifecycleState::Configure));
        }
    }

    #[test]
    fn large_playlist_is_consolidated() {
        let group = playlist(
            &["u1", "u2", "u3"],
            vec![
                member("u1", 10.0, &["opus"], vec![format("a", 720, 30), format("b", 1080, 30)]),
                member("u2", 5.5, &["mp4a", "opus"], vec![format("c", 720, 30), format("d", 480, 30)]),
                Item::unavailable(GroupId::new(), "u3"),
            ],
        );
        let (mut store, mut states, id) = setup(group);

        let result = finalize(&mut store, &mut states, id, 3).unwrap();
        assert_eq!(
            result,
            Finalized::Consolidated {
                group: id,
                items: 2
            }
        );
        assert_eq!(result.notification(), (NotificationKind::PlaylistReady, 2));

        let group = store.find_group_by_id(id).unwrap();
        assert!(group.is_combined);
        assert_eq!(group.items.iter().filter(|i| i.is_leader).count(), 1);
        let leader = group.leader().unwrap();
        assert!(leader.is_descriptor());
        assert_eq!(leader.duration, Some(15.5));
        assert_eq!(leader.size, Some(200));
        assert_eq!(leader.audio_codecs, vec!["opus", "mp4a"]);
        let ids: Vec<_> = leader.formats.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);

        assert_eq!(group.title.as_deref(), Some("List"));
        assert_eq!(group.duration, Some(15.5));
        assert_eq!(group.formats.len(), 3);

        assert_eq!(states.group_state(group), Some(LifecycleState::Configure));
        for item in &group.items {
            let expected = if item.unavailable {
                LifecycleState::Error
            } else {
                LifecycleState::Configure
            };
            assert_eq!(states.state(item.id), Some(expected));
        }
    }

    #[test]
    fn threshold_boundary_consolidates() {
        let group = playlist(&["u1", "u2"], vec![member("u1", 1.0, &[], vec![]), member("u2", 1.0, &[], vec![])]);
        let (mut store, mut states, id) = setup(group);
        assert!(matches!(
            finalize(&mut store, &mut states, id, 2).unwrap(),
            Finalized::Consolidated { .. }
        ));
    }

    #[test]
    fn playlist_without_available_entries_is_kept() {
        for threshold in [1, 50] {
            let group = playlist(
                &["u1", "u2"],
                vec![
                    Item::unavailable(GroupId::new(), "u1"),
                    Item::unavailable(GroupId::new(), "u2"),
                ],
            );
            let descriptor = group.items[0].id;
            let (mut store, mut states, id) = setup(group);

            assert!(matches!(
                finalize(&mut store, &mut states, id, threshold),
                Err(crate::error::Error::Download(DownloadError::NoDownloadableItems { id: failed }))
                    if failed == id
            ));
            let group = store.find_group_by_id(id).unwrap();
            assert!(!group.is_combined);
            assert_eq!(group.items.len(), 3);
            assert_eq!(states.state(descriptor), Some(LifecycleState::FetchingList));
        }
    }

    #[test]
    fn unknown_group_is_an_error() {
        let mut store = EntityStore::new();
        let mut states = StateMachine::new();
        assert!(finalize(&mut store, &mut states, GroupId::new(), 50).is_err());
    }
}
