//! Bounded, keyed job scheduling
//!
//! All jobs share one fair semaphore, so at most `max` tools run at once and
//! waiting jobs start in submission order. A job may be scheduled under a key
//! (the engine uses the group id); every key owns a cancellation token derived
//! from the limiter's root token, so a whole group's jobs can be cancelled at
//! once without touching anyone else's. Cancelled jobs that are still queued
//! are never dispatched.

use crate::error::{Error, Result};
use crate::job::Job;
use crate::runner::RunOutcome;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// How a scheduled job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran; this is how its process ended
    Completed(RunOutcome),
    /// The job was cancelled before it got a slot
    Revoked,
}

#[derive(Debug, Default)]
struct KeyLoad {
    pending: AtomicUsize,
    running: AtomicUsize,
}

#[derive(Debug)]
struct KeyState {
    token: CancellationToken,
    load: Arc<KeyLoad>,
}

/// Decrements the counters of a job when it leaves the queue or finishes
struct LoadGuard<'a> {
    counter: &'a AtomicUsize,
    key: Option<Arc<KeyLoad>>,
    running: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.running {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(load) = &self.key {
            let slot = if self.running {
                &load.running
            } else {
                &load.pending
            };
            slot.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl LoadGuard<'_> {
    fn start(&mut self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
        if let Some(load) = &self.key {
            load.pending.fetch_sub(1, Ordering::SeqCst);
            load.running.fetch_add(1, Ordering::SeqCst);
        }
        self.running = true;
    }
}

/// Concurrency limiter for tool invocations
#[derive(Debug)]
pub struct Limiter {
    semaphore: Arc<Semaphore>,
    root: CancellationToken,
    keys: Mutex<HashMap<String, KeyState>>,
    max: AtomicUsize,
    in_flight: AtomicUsize,
}

impl Limiter {
    /// Create a limiter running at most `max` jobs at once
    pub fn new(max: usize) -> Result<Self> {
        validate_max(max)?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max)),
            root: CancellationToken::new(),
            keys: Mutex::new(HashMap::new()),
            max: AtomicUsize::new(max),
            in_flight: AtomicUsize::new(0),
        })
    }

    fn keys(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Token and load counters of `key`, created on first use
    fn enter_key(&self, key: &str) -> (CancellationToken, Arc<KeyLoad>) {
        let mut keys = self.keys();
        let state = keys.entry(key.to_string()).or_insert_with(|| KeyState {
            token: self.root.child_token(),
            load: Arc::new(KeyLoad::default()),
        });
        state.load.pending.fetch_add(1, Ordering::SeqCst);
        (state.token.clone(), state.load.clone())
    }

    /// Run `job` once a slot is free
    ///
    /// Without a key the job only answers to [`shutdown`](Self::shutdown).
    /// Returns [`JobOutcome::Revoked`] when the job was cancelled before it
    /// started; the job's [`on_cancel`](Job::on_cancel) is called in that case
    /// and when a running job was interrupted.
    pub async fn schedule<J>(&self, key: Option<&str>, job: &mut J) -> Result<JobOutcome>
    where
        J: Job + ?Sized,
    {
        let (token, load) = match key {
            Some(key) => {
                let (token, load) = self.enter_key(key);
                (token, Some(load))
            }
            None => (self.root.child_token(), None),
        };
        let mut guard = LoadGuard {
            counter: &self.in_flight,
            key: load,
            running: false,
        };

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit.filter(|_| !token.is_cancelled()) else {
            tracing::debug!(key, kind = job.kind().as_str(), "Job revoked before start");
            job.on_cancel();
            return Ok(JobOutcome::Revoked);
        };

        guard.start();
        tracing::debug!(key, kind = job.kind().as_str(), "Job started");
        let outcome = job.run(token).await?;
        if outcome == RunOutcome::Killed {
            job.on_cancel();
        }
        drop(guard);
        Ok(JobOutcome::Completed(outcome))
    }

    /// Cancel every queued and running job of `key`
    ///
    /// Later jobs scheduled under the same key run normally.
    pub fn cancel_key(&self, key: &str) {
        let mut keys = self.keys();
        if let Some(state) = keys.get_mut(key) {
            tracing::debug!(key, "Cancelling key");
            state.token.cancel();
            state.token = self.root.child_token();
        }
    }

    /// Forget `key`
    pub fn release_key(&self, key: &str) {
        self.keys().remove(key);
    }

    /// Change the bound at runtime
    ///
    /// Shrinking takes effect as running jobs finish; nothing is interrupted.
    pub fn set_max(&self, max: usize) -> Result<()> {
        validate_max(max)?;
        let old = self.max.swap(max, Ordering::SeqCst);
        if max > old {
            self.semaphore.add_permits(max - old);
        } else if max < old {
            let excess = old - max;
            let forgotten = self.semaphore.forget_permits(excess);
            let remaining = excess - forgotten;
            if remaining > 0 {
                let semaphore = self.semaphore.clone();
                let Ok(remaining) = u32::try_from(remaining) else {
                    return Err(Error::Config {
                        message: "concurrency change too large".into(),
                        key: Some("max_concurrency".into()),
                    });
                };
                tokio::spawn(async move {
                    if let Ok(permits) = semaphore.acquire_many_owned(remaining).await {
                        permits.forget();
                    }
                });
            }
        }
        tracing::info!(old, new = max, "Concurrency limit changed");
        Ok(())
    }

    /// Current bound
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    /// Number of jobs currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// `(queued, running)` job counts of `key`
    pub fn key_load(&self, key: &str) -> (usize, usize) {
        self.keys().get(key).map_or((0, 0), |state| {
            (
                state.load.pending.load(Ordering::SeqCst),
                state.load.running.load(Ordering::SeqCst),
            )
        })
    }

    /// Cancel everything and refuse further work
    pub fn shutdown(&self) {
        self.root.cancel();
        self.semaphore.close();
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

fn validate_max(max: usize) -> Result<()> {
    if max == 0 {
        return Err(Error::Config {
            message: "max_concurrency must be at least 1".into(),
            key: Some("max_concurrency".into()),
        });
    }
    Ok(())
}
