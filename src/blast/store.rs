//! In-memory registry of blast jobs.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::model::BlastJob;
use crate::error::JobError;

struct StoredJob {
    /// Insertion order, used to break `created_at` ties.
    seq: u64,
    job: BlastJob,
}

#[derive(Default)]
struct Jobs {
    next_seq: u64,
    by_id: HashMap<String, StoredJob>,
}

/// Keyed store of every job created in this process. Jobs are never removed.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<Jobs>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job.
    pub async fn create(&self, job: BlastJob) {
        let mut jobs = self.jobs.write().await;
        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        jobs.by_id.insert(job.id.clone(), StoredJob { seq, job });
    }

    /// Snapshot of a job.
    pub async fn get(&self, id: &str) -> Option<BlastJob> {
        self.jobs.read().await.by_id.get(id).map(|s| s.job.clone())
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<BlastJob> {
        let jobs = self.jobs.read().await;
        let mut stored: Vec<&StoredJob> = jobs.by_id.values().collect();
        stored.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        stored.into_iter().map(|s| s.job.clone()).collect()
    }

    /// Mutate a job in place under the store's write lock.
    pub(crate) async fn update<F, R>(&self, id: &str, f: F) -> Result<R, JobError>
    where
        F: FnOnce(&mut BlastJob) -> R,
    {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.by_id.get_mut(id).ok_or_else(|| JobError::NotFound {
            id: id.to_string(),
        })?;
        Ok(f(&mut stored.job))
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.by_id.is_empty()
    }
}
