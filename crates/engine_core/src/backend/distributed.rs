//! The distributed backend: interface only. Dispatching a job's callable
//! to a remote worker requires a wire protocol and a worker registry,
//! both explicitly out of scope (spec Non-goals). What's implemented
//! here is the resource-accounting seam a real transport would plug
//! into, so the job state machine's admission logic is uniform across
//! every backend kind.

use async_trait::async_trait;
use engine_ids::JobId;

use super::{Backend, BackendKind, ResourceCounter};

pub struct DistributedBackend {
    available: ResourceCounter,
}

impl DistributedBackend {
    /// Capacity here stands in for "remote worker slots known to be
    /// free"; a real implementation would refresh this from worker
    /// heartbeats rather than a static count. `max_remote_slots == 0`
    /// means unbounded, matching the other per-kind backends.
    pub fn new(max_remote_slots: u32) -> Self {
        let available = if max_remote_slots == 0 {
            ResourceCounter::unbounded()
        } else {
            ResourceCounter::new(max_remote_slots as i64)
        };
        Self { available }
    }
}

#[async_trait]
impl Backend for DistributedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Distributed
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

    /// No transport is wired up, so a remote job can only ever be
    /// cancelled locally (its future moves to `cancelled` even though
    /// nothing was told to stop). A real deployment would send a
    /// cancel RPC here.
    async fn cancel(&self, _job_id: &JobId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_slots_means_unbounded() {
        let backend = DistributedBackend::new(0);
        for _ in 0..1000 {
            assert!(backend.acquire());
        }
    }

    #[test]
    fn configured_slot_count_is_enforced() {
        let backend = DistributedBackend::new(1);
        assert!(backend.acquire());
        assert!(!backend.acquire());
        backend.release();
        assert!(backend.has_capacity());
    }
}
