//! The backend contract (spec §4.4): where a job's callable actually
//! executes, independent of the job state machine that supervises it.
//!
//! Only [`BackendKind::Local`] runs in-process on the engine's own Tokio
//! runtime. The other three describe increasingly isolated execution
//! contexts; this crate implements them as far as is meaningful without
//! a real worker pool or network transport (spec Non-goals), and documents
//! the seam where a production deployment would plug one in.

pub mod distributed;
pub mod local;
pub mod process;
pub mod sentinel;
pub mod subprocess;
pub mod thread;
pub mod webapp;

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use engine_ids::JobId;

/// A simple acquire/release slot counter, shared by every backend's
/// own per-kind capacity and by the engine-global job counter (spec
/// §4.4 `has_resource = (n_job > 0) AND (backend counter > 0)`).
pub(crate) struct ResourceCounter {
    available: AtomicI64,
}

impl ResourceCounter {
    /// `capacity` is taken literally: `0` means no slot is ever free.
    pub(crate) fn new(capacity: i64) -> Self {
        Self {
            available: AtomicI64::new(capacity),
        }
    }

    pub(crate) fn unbounded() -> Self {
        Self::new(i64::MAX)
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.available.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn acquire(&self) -> bool {
        let mut current = self.available.load(Ordering::SeqCst);
        loop {
            if current <= 0 {
                return false;
            }
            match self.available.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub(crate) fn release(&self) {
        self.available.fetch_add(1, Ordering::SeqCst);
    }
}

/// Where a job's callable runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BackendKind {
    /// Runs as a plain task on the engine's own async runtime.
    Local,
    /// Runs on a dedicated OS thread, for blocking or CPU-bound work.
    Thread,
    /// Runs in a separate OS process.
    Process,
    /// Runs on a remote worker reachable over the network (interface
    /// only: no transport is implemented, per spec Non-goals).
    Distributed,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Local,
        BackendKind::Thread,
        BackendKind::Process,
        BackendKind::Distributed,
    ];
}

/// Anything identifiable as the owner of a backend-level resource slot.
/// [`crate::job::Job`] implements this so backends can log and account
/// for resource usage without depending on the full `Job` type.
pub trait JobOutcome: Send + Sync {
    fn job_id(&self) -> &JobId;
}

/// A pool of execution slots of one kind, plus the means to actually run
/// a job's callable in that context and to cancel a job already running
/// there.
///
/// Resource accounting (`has_capacity`/`acquire`/`release`) is kept
/// separate from dispatch (`cancel`) because the job state machine
/// consults capacity long before it has anything to cancel.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether at least one slot is currently free.
    fn has_capacity(&self) -> bool;

    /// Attempt to claim a slot; `false` means none was free (a race with
    /// another job, or a capacity of zero).
    fn acquire(&self) -> bool;

    /// Release a previously acquired slot.
    fn release(&self);

    /// Best-effort cancellation of whatever is running this job, if
    /// anything is. Local and thread backends can cancel cooperatively
    /// via the caller's own cancel flag; process and distributed
    /// backends would send a kill/cancel signal to the remote runtime.
    async fn cancel(&self, job_id: &JobId);
}
