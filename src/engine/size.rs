//! Size estimates per selection

use super::QueueEngine;
use super::jobs::SizeJob;
use crate::error::{DownloadError, Result};
use crate::formats::resolve_options;
use crate::limiter::JobOutcome;
use crate::types::{DownloadOptions, GroupId, ItemId};

impl QueueEngine {
    /// Estimated download size of a group for `options`, in bytes
    ///
    /// Sizes are cached per item and resolved selection; missing ones are
    /// fetched under the group's key, so pausing or deleting the group
    /// abandons the lookup. Members whose size is unknown are left out of the
    /// sum. Returns `None` when no member size is known.
    pub async fn group_size(&self, id: GroupId, options: DownloadOptions) -> Result<Option<u64>> {
        let (mut total, missing) = self.with_model(|model, _| -> Result<_> {
            let group = model
                .store
                .find_group_by_id(id)
                .ok_or(DownloadError::GroupNotFound { id })?;

            let mut total: Option<u64> = None;
            let mut missing: Vec<(ItemId, String, DownloadOptions)> = Vec::new();
            for item in group.items.iter().filter(|i| i.is_downloadable()) {
                let resolved = resolve_options(&options, &item.formats);
                match model.sizes.get(&(item.id, resolved.clone())) {
                    Some(size) => total = Some(total.unwrap_or(0) + size),
                    None => missing.push((item.id, item.url.clone(), resolved)),
                }
            }
            Ok((total, missing))
        })?;

        if missing.is_empty() {
            return Ok(total);
        }
        tracing::debug!(group_id = %id, lookups = missing.len(), "Fetching sizes");

        let key = id.to_string();
        let lookups = missing.into_iter().map(|(item_id, url, options)| {
            let key = key.clone();
            async move {
                let mut job = SizeJob {
                    engine: self.clone(),
                    url,
                    options: options.clone(),
                    size: None,
                };
                match self.limiter.schedule(Some(&key), &mut job).await {
                    Ok(JobOutcome::Completed(_)) => job.size.map(|size| (item_id, options, size)),
                    Ok(JobOutcome::Revoked) => None,
                    Err(e) => {
                        tracing::debug!(item_id = %item_id, error = %e, "Size lookup failed");
                        None
                    }
                }
            }
        });
        let fetched: Vec<_> = futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect();

        self.with_model(|model, _| {
            // The group may have been deleted while sizes were fetched
            let known = model.store.find_group_by_id(id).is_some();
            for (item_id, options, size) in fetched {
                total = Some(total.unwrap_or(0) + size);
                if known {
                    model.sizes.insert((item_id, options), size);
                }
            }
        });
        Ok(total)
    }
}
