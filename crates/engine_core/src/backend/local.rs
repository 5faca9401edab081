//! The local backend: jobs run as plain tasks on the engine's own async
//! runtime. Unlike the other three kinds, `EngineSetting` has no
//! separate per-kind cap for `Local` — its concurrency is bounded
//! solely by the engine-global job counter (`EngineSetting::max_jobs`),
//! so this backend itself has no capacity of its own to track.

use async_trait::async_trait;
use engine_ids::JobId;

use super::{Backend, BackendKind};

pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn has_capacity(&self) -> bool {
        true
    }

    fn acquire(&self) -> bool {
        true
    }

    fn release(&self) {}

    /// Cancellation is cooperative: the job itself checks its cancel
    /// flag between steps, there is no OS-level mechanism to interrupt
    /// a task running in-process.
    async fn cancel(&self, _job_id: &JobId) {}
}
