//! Runtime configuration updates: concurrency bound and split threshold.

use super::QueueEngine;
use crate::error::{Error, Result};

impl QueueEngine {
    /// Current bound on concurrently running tools
    pub fn max_concurrency(&self) -> usize {
        self.limiter.max()
    }

    /// Change the bound on concurrently running tools
    ///
    /// Raising the bound starts queued jobs immediately. Lowering it takes
    /// effect as running jobs finish; nothing is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a bound of zero.
    pub fn set_max_concurrency(&self, max: usize) -> Result<()> {
        self.limiter.set_max(max)
    }

    /// Current split threshold
    pub fn split_threshold(&self) -> usize {
        self.with_model(|model, _| model.split_threshold)
    }

    /// Change the playlist split threshold
    ///
    /// Applies to playlists finalized from now on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a threshold of zero.
    pub fn set_split_threshold(&self, threshold: usize) -> Result<()> {
        if threshold == 0 {
            return Err(Error::Config {
                message: "split_threshold must be at least 1".into(),
                key: Some("split_threshold".into()),
            });
        }
        let old = self.with_model(|model, _| std::mem::replace(&mut model.split_threshold, threshold));
        tracing::info!(old, new = threshold, "Split threshold changed");
        Ok(())
    }
}
