//! The thread backend: capacity is bounded by how many dedicated OS
//! threads the engine is configured to hand out. Placement itself (the
//! job's callable actually running via `tokio::task::spawn_blocking`)
//! is the concern of whichever `JobFn` a caller builds for thread-backed
//! work, not of the backend — the backend here is pure resource
//! accounting plus a place to track in-flight jobs for cancellation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use engine_ids::JobId;
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendKind, ResourceCounter};

pub struct ThreadBackend {
    available: ResourceCounter,
    running: Mutex<HashMap<JobId, CancellationToken>>,
}

impl ThreadBackend {
    /// `max_threads == 0` means unbounded.
    pub fn new(max_threads: u32) -> Self {
        let available = if max_threads == 0 {
            ResourceCounter::unbounded()
        } else {
            ResourceCounter::new(max_threads as i64)
        };
        Self {
            available,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Register a cancellation token for a job about to run on a
    /// dedicated thread, so a later `cancel` call can reach it.
    pub fn track(&self, job_id: JobId, token: CancellationToken) {
        self.running.lock().unwrap().insert(job_id, token);
    }

    pub fn untrack(&self, job_id: &JobId) {
        self.running.lock().unwrap().remove(job_id);
    }
}

#[async_trait]
impl Backend for ThreadBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Thread
    }

    fn has_capacity(&self) -> bool {
        self.available.has_capacity()
    }

    fn acquire(&self) -> bool {
        self.available.acquire()
    }

    fn release(&self) {
        self.available.release()
    }

    async fn cancel(&self, job_id: &JobId) {
        if let Some(token) = self.running.lock().unwrap().get(job_id) {
            token.cancel();
        }
    }
}
