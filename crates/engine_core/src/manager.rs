//! [`Jobs`]: the engine's registry of every job it has ever been asked
//! to run (spec §4.3).
//!
//! A job's current [`Status`](crate::job::Status) lives on the job
//! itself, not in this registry's structure — `Jobs` is a single
//! ordered store plus status-filtered views, rather than five separate
//! containers a job must be physically moved between on every
//! transition. That keeps `Job::transition` from needing a back-channel
//! into the store just to relocate itself.

use std::sync::Arc;
use std::sync::Mutex;

use engine_ids::JobId;

use crate::condition::EngineSnapshot;
use crate::job::{Job, Status};
use crate::store::JobStore;

#[derive(Default)]
pub struct Jobs {
    store: Mutex<JobStore>,
}

impl Jobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, job: Arc<Job>) {
        self.store.lock().unwrap().insert(job);
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.store.lock().unwrap().get(id)
    }

    pub fn remove(&self, id: &JobId) -> Option<Arc<Job>> {
        self.store.lock().unwrap().remove(id)
    }

    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().unwrap().is_empty()
    }

    /// Every tracked job, in registration order.
    pub fn all_jobs(&self) -> Vec<Arc<Job>> {
        self.store.lock().unwrap().iter().collect()
    }

    pub fn jobs_with_status(&self, status: Status) -> Vec<Arc<Job>> {
        self.store
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.status() == status)
            .collect()
    }

    pub fn pending_jobs(&self) -> Vec<Arc<Job>> {
        self.jobs_with_status(Status::Pending)
    }

    pub fn running_jobs(&self) -> Vec<Arc<Job>> {
        self.jobs_with_status(Status::Running)
    }

    /// Every job not yet in a terminal state — the set `cancel_all`
    /// needs to walk.
    pub fn active_jobs(&self) -> Vec<Arc<Job>> {
        self.store
            .lock()
            .unwrap()
            .iter()
            .filter(|j| !j.status().is_terminal())
            .collect()
    }

    /// Drop every tracked job whose status is in `statuses`. Mirrors
    /// the original's `Jobs.clear(statuses)` bulk-eviction helper — a
    /// long-lived engine needs a way to reclaim memory for jobs no one
    /// is holding a `JobFuture` to anymore.
    pub fn clear(&self, statuses: &[Status]) {
        let mut store = self.store.lock().unwrap();
        let matching: Vec<JobId> = store
            .iter()
            .filter(|j| statuses.contains(&j.status()))
            .map(|j| j.id().clone())
            .collect();
        for id in matching {
            store.remove(&id);
        }
    }

    /// Drop every job that has reached a terminal state, keeping
    /// pending/running jobs untouched.
    pub fn clear_non_active(&self) {
        self.clear(&[Status::Done, Status::Failed, Status::Cancelled]);
    }

    /// Drop every tracked job regardless of status. Callers are
    /// responsible for cancelling anything still active first.
    pub fn clear_all(&self) {
        *self.store.lock().unwrap() = JobStore::new();
    }
}

impl EngineSnapshot for Jobs {
    fn status_of(&self, job_id: &JobId) -> Option<Status> {
        self.get(job_id).map(|j| j.status())
    }
}
