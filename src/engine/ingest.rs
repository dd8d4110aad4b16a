//! URL submission, metadata ingestion and playlist finalization

use super::jobs::{FetchEntryJob, FetchInfoJob};
use super::report::internal_fatal;
use super::{Effects, Model, QueueEngine};
use crate::error::{DownloadError, Error, Result};
use crate::notify::NotificationParams;
use crate::parsers::{MediaInfo, PlaylistInfo, SingleInfo};
use crate::policy::{Finalized, finalize};
use crate::types::{Event, Group, GroupId, Item, ItemId, LifecycleState, NotificationKind};
use std::collections::HashMap;
use std::sync::atomic::Ordering;

impl QueueEngine {
    /// Add a URL to the queue
    ///
    /// Creates a group holding a placeholder in `fetching` and schedules the
    /// metadata fetch. `headers` are passed to every download of the group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown started, or
    /// [`Error::InvalidUrl`] when `url` does not parse.
    pub async fn submit_url(
        &self,
        url: &str,
        headers: Option<HashMap<String, String>>,
    ) -> Result<GroupId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let url = url::Url::parse(url.trim())?.to_string();

        let mut group = Group::with_placeholder(url.clone());
        group.headers = headers;
        let placeholder = group.items[0].id;

        let group_id = self.with_model(|model, fx| {
            let group_id = model.store.create_group(group);
            fx.event(Event::GroupCreated {
                group_id,
                url: url.clone(),
            });
            model.set_item_state(group_id, placeholder, LifecycleState::Fetching, fx);
            group_id
        });

        tracing::info!(group_id = %group_id, url = %url, "URL submitted");

        self.spawn_job(
            Some(group_id),
            FetchInfoJob {
                engine: self.clone(),
                group_id,
                item_id: placeholder,
                url,
            },
        );
        Ok(group_id)
    }

    /// Apply the metadata fetched for a submitted URL
    pub(crate) fn ingest_info(&self, group_id: GroupId, placeholder: ItemId, info: MediaInfo) {
        match info {
            MediaInfo::Single(info) => self.ingest_single(group_id, placeholder, info),
            MediaInfo::Playlist(info) if info.entries.is_empty() => self.fail_item(
                group_id,
                placeholder,
                internal_fatal("The playlist has no entries."),
            ),
            MediaInfo::Playlist(info) => self.ingest_playlist(group_id, placeholder, info),
        }
    }

    fn ingest_single(&self, group_id: GroupId, placeholder: ItemId, info: SingleInfo) {
        let ingested = self.with_model(|model, fx| {
            let group = model.store.find_group_mut(group_id)?;
            let item = group.item_mut(placeholder)?;
            item.placeholder = false;
            info.apply_to(item);
            let item = item.clone();
            group.copy_leader_metadata(&item);

            fx.event(Event::ItemAdded {
                group_id,
                item_id: item.id,
                title: item.title.clone(),
            });
            model.set_item_state(group_id, item.id, LifecycleState::Configure, fx);
            fx.notify(
                NotificationKind::ItemReady,
                NotificationParams {
                    title: item.title.clone(),
                    count: 1,
                    message: None,
                },
            );
            Some(item.is_live)
        });

        if let Some(is_live) = ingested {
            tracing::info!(group_id = %group_id, is_live, "Media ready");
            self.limiter.release_key(&group_id.to_string());
        }
    }

    fn ingest_playlist(&self, group_id: GroupId, placeholder: ItemId, info: PlaylistInfo) {
        let entries = info.entries.clone();
        let ingested = self.with_model(|model, fx| {
            let group = model.store.find_group_mut(group_id)?;
            let item = group.item_mut(placeholder)?;
            item.placeholder = false;
            item.title = info.title;
            item.uploader = info.uploader;
            item.thumbnail = info.thumbnail;
            item.entries = Some(info.entries);
            let item = item.clone();
            group.copy_leader_metadata(&item);
            group.total = entries.len();
            group.processed = 0;

            fx.event(Event::ItemAdded {
                group_id,
                item_id: item.id,
                title: item.title.clone(),
            });
            model.set_item_state(group_id, item.id, LifecycleState::FetchingList, fx);
            Some(())
        });
        if ingested.is_none() {
            return;
        }

        tracing::info!(group_id = %group_id, entries = entries.len(), "Playlist discovered");
        for url in entries {
            self.spawn_job(
                Some(group_id),
                FetchEntryJob {
                    engine: self.clone(),
                    group_id,
                    url,
                },
            );
        }
    }

    /// Add a fetched playlist entry to its group
    pub(crate) fn add_entry(&self, group_id: GroupId, url: &str, info: SingleInfo) {
        let mut item = Item::new(group_id, url);
        info.apply_to(&mut item);
        self.add_member(group_id, item, LifecycleState::FetchingList);
    }

    /// Record a playlist entry whose metadata could not be fetched
    pub(crate) fn add_unavailable(&self, group_id: GroupId, url: &str) {
        self.add_member(group_id, Item::unavailable(group_id, url), LifecycleState::Error);
    }

    fn add_member(&self, group_id: GroupId, item: Item, state: LifecycleState) {
        let finalized = self.with_model(|model, fx| {
            let group = model.store.find_group_mut(group_id)?;
            if group.is_combined || group.processed >= group.total {
                tracing::warn!(group_id = %group_id, url = %item.url, "Ignoring entry for finalized playlist");
                return None;
            }
            let item_id = item.id;
            let title = item.title.clone();
            group.items.push(item);
            group.processed += 1;
            let complete = group.processed == group.total;

            fx.event(Event::ItemAdded {
                group_id,
                item_id,
                title,
            });
            model.set_item_state(group_id, item_id, state, fx);

            if complete {
                model.finalize_playlist(group_id, fx)
            } else {
                None
            }
        });

        if let Some(finalized) = finalized {
            if let Finalized::Split { from, .. } = &finalized {
                self.limiter.release_key(&from.to_string());
            }
            tracing::debug!(group_id = %group_id, result = ?finalized, "Playlist finalized");
        }
    }
}

impl Model {
    /// Split or consolidate a fully discovered playlist
    fn finalize_playlist(&mut self, group_id: GroupId, fx: &mut Effects) -> Option<Finalized> {
        let title = self
            .store
            .find_group_by_id(group_id)
            .and_then(|g| g.title.clone());
        let finalized = match finalize(
            &mut self.store,
            &mut self.states,
            group_id,
            self.split_threshold,
        ) {
            Ok(finalized) => finalized,
            Err(Error::Download(DownloadError::NoDownloadableItems { .. })) => {
                tracing::warn!(group_id = %group_id, "No playlist entry could be fetched");
                let descriptor = self.store.find_group_leader(group_id).map(|l| l.id);
                if let Some(descriptor) = descriptor {
                    self.apply_fatal(
                        group_id,
                        descriptor,
                        internal_fatal("None of the playlist entries could be fetched."),
                        fx,
                    );
                }
                return None;
            }
            Err(e) => {
                tracing::error!(group_id = %group_id, error = %e, "Playlist finalization failed");
                return None;
            }
        };

        let (kind, count) = finalized.notification();
        match &finalized {
            Finalized::Split { from, into } => {
                fx.event(Event::GroupSplit {
                    group_id: *from,
                    into: into.clone(),
                });
                for id in into {
                    let Some(group) = self.store.find_group_by_id(*id) else {
                        continue;
                    };
                    fx.event(Event::GroupCreated {
                        group_id: *id,
                        url: group.url.clone(),
                    });
                    for item in &group.items {
                        fx.event(Event::StateChanged {
                            group_id: *id,
                            item_id: item.id,
                            state: LifecycleState::Configure,
                        });
                    }
                }
            }
            Finalized::Consolidated { group, items } => {
                fx.event(Event::GroupConsolidated {
                    group_id: *group,
                    items: *items,
                });
                if let Some(g) = self.store.find_group_by_id(*group) {
                    for item in g.items.iter().filter(|i| !i.unavailable) {
                        fx.event(Event::StateChanged {
                            group_id: *group,
                            item_id: item.id,
                            state: LifecycleState::Configure,
                        });
                    }
                }
            }
        }
        if count > 0 {
            fx.notify(
                kind,
                NotificationParams {
                    title,
                    count,
                    message: None,
                },
            );
        }
        Some(finalized)
    }
}
