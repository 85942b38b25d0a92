//! In-memory job record store.

use std::collections::HashMap;
use std::sync::RwLock;

use super::record::JobRecord;

/// Shared store of [`JobRecord`]s keyed by job id.
///
/// All mutation goes through [`JobStore::update`], which is the single place
/// terminal-state immutability is enforced. Capacity is bounded: once the
/// store holds more than `max_history` records, the oldest *terminal* records
/// are evicted; running and queued jobs are never evicted.
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
    max_history: usize,
}

impl JobStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_history: max_history.max(1),
        }
    }

    /// Inserts a freshly created record, evicting old terminal records if the
    /// store has grown past its cap.
    pub fn insert(&self, record: JobRecord) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| {
            log::warn!("Job store lock poisoned on insert, recovering");
            e.into_inner()
        });
        jobs.insert(record.id.clone(), record);

        if jobs.len() > self.max_history {
            let excess = jobs.len() - self.max_history;
            let mut evictable: Vec<(String, chrono::DateTime<chrono::Utc>)> = jobs
                .values()
                .filter(|r| r.is_terminal())
                .map(|r| (r.id.clone(), r.created_at))
                .collect();
            evictable.sort_by_key(|(_, created)| *created);
            for (id, _) in evictable.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }
    }

    /// Returns a snapshot of the record, if present.
    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        let jobs = self.jobs.read().unwrap_or_else(|e| {
            log::warn!("Job store lock poisoned on read, recovering");
            e.into_inner()
        });
        jobs.get(job_id).cloned()
    }

    /// Returns snapshots of all records, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let jobs = self.jobs.read().unwrap_or_else(|e| {
            log::warn!("Job store lock poisoned on read, recovering");
            e.into_inner()
        });
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Applies `mutate` to the record under the write lock.
    ///
    /// Returns `false` without calling `mutate` when the record is missing or
    /// already terminal; late writes from a stage that lost a cancellation
    /// race are dropped here.
    pub fn update<F>(&self, job_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| {
            log::warn!("Job store lock poisoned on update, recovering");
            e.into_inner()
        });
        match jobs.get_mut(job_id) {
            Some(record) if !record.is_terminal() => {
                mutate(record);
                true
            }
            Some(_) => {
                log::debug!("Dropping update for terminal job {}", job_id);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        let jobs = self.jobs.read().unwrap_or_else(|e| {
            log::warn!("Job store lock poisoned on read, recovering");
            e.into_inner()
        });
        jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
