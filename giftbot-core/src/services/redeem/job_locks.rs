// File: src/services/redeem/job_locks.rs

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use giftbot_common::models::JobKey;

/// Process-local mutual exclusion per `(community, code)` job. Holding the
/// lock is what collapses the startup-scan / discovery / manual-retrigger
/// race into a single coordinator run. Never persisted; a crash releases
/// everything, and startup reconciliation re-dispatches whatever was open.
#[derive(Clone, Default)]
pub struct JobLockService {
    locks: Arc<DashMap<JobKey, ()>>,
}

impl JobLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically takes the lock for `key`. Returns `None` when a job for
    /// the same key is already running; the caller drops its job as a no-op.
    pub fn try_acquire(&self, key: &JobKey) -> Option<JobLockGuard> {
        match self.locks.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(());
                debug!("Job lock acquired for {:?}", key);
                Some(JobLockGuard {
                    key: key.clone(),
                    locks: Arc::clone(&self.locks),
                })
            }
        }
    }

    pub fn is_held(&self, key: &JobKey) -> bool {
        self.locks.contains_key(key)
    }
}

/// Releases the lock on drop, so every coordinator exit path (completion,
/// no-op, job-level error, panic unwind) frees the slot.
pub struct JobLockGuard {
    key: JobKey,
    locks: Arc<DashMap<JobKey, ()>>,
}

impl Drop for JobLockGuard {
    fn drop(&mut self) {
        self.locks.remove(&self.key);
        debug!("Job lock released for {:?}", self.key);
    }
}
