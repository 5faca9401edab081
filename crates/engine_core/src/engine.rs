//! [`Engine`]: the supervisor that owns the job manager, the per-kind
//! resource pools, and the backends jobs run against (spec §4, §5).

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use engine_ids::{EngineId, JobId};
use futures::FutureExt;
use tracing::{info, warn};

use crate::backend::distributed::DistributedBackend;
use crate::backend::local::LocalBackend;
use crate::backend::process::ProcessBackend;
use crate::backend::thread::ThreadBackend;
use crate::backend::{Backend, BackendKind, ResourceCounter};
use crate::condition::EngineSnapshot;
use crate::error::{EngineError, Result};
use crate::job::{Job, Status};
use crate::manager::Jobs;
use crate::persistence;

/// Where job state is kept once it leaves memory (spec §6 `EngineSetting.cache_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    /// Nothing is written to disk; `stop()`/`start()` never persist or
    /// restore a snapshot.
    #[default]
    Memory,
    /// Job snapshots and per-job captured output live under the
    /// engine's cache path (spec §6 "Persistence format").
    Disk,
}

/// Construction-time configuration for an [`Engine`] (spec §6
/// `EngineSetting`): concurrency limits, where job output gets cached,
/// whether to persist across restarts.
#[derive(Debug, Clone)]
pub struct EngineSetting {
    pub max_thread_jobs: Option<u32>,
    pub max_process_jobs: Option<u32>,
    pub max_distributed_jobs: Option<u32>,
    /// Engine-global concurrency cap, enforced in addition to (not
    /// instead of) each kind's own per-kind cap: a job is admitted only
    /// when both this counter and its backend kind's counter have a
    /// free slot (spec §4.4). Taken literally, not the "0 = unbounded"
    /// convention the per-kind `Option` fields use — `max_jobs = 0`
    /// means no job of any kind is ever admitted.
    pub max_jobs: u32,
    pub cache_type: CacheType,
    /// Root of the engine's on-disk cache. Defaults to
    /// `.executor/<engine-id>` when unset (spec §6).
    pub cache_path: Option<PathBuf>,
    pub print_traceback: bool,
    /// The name a job's injected-engine argument is conceptually bound
    /// under in the source's keyword-argument model. Rust callables take
    /// positional `Vec<JobOutput>` args with no parameter names to match
    /// against, so this is carried for configuration-surface parity and
    /// logging only; the actual trigger is `JobSpec::inject_engine` — see
    /// DESIGN.md.
    pub kwargs_inject_key: String,
}

impl Default for EngineSetting {
    fn default() -> Self {
        Self {
            max_thread_jobs: Some(8),
            max_process_jobs: Some(4),
            max_distributed_jobs: None,
            max_jobs: 20,
            cache_type: CacheType::default(),
            cache_path: None,
            print_traceback: true,
            kwargs_inject_key: "__engine__".to_string(),
        }
    }
}

fn unbounded_as_zero(limit: Option<u32>) -> u32 {
    limit.unwrap_or(0)
}

struct Backends {
    local: LocalBackend,
    thread: ThreadBackend,
    process: ProcessBackend,
    distributed: DistributedBackend,
}

impl Backends {
    fn for_kind(&self, kind: BackendKind) -> &dyn Backend {
        match kind {
            BackendKind::Local => &self.local,
            BackendKind::Thread => &self.thread,
            BackendKind::Process => &self.process,
            BackendKind::Distributed => &self.distributed,
        }
    }
}

struct EngineInner {
    id: EngineId,
    settings: EngineSetting,
    cache_path: PathBuf,
    jobs: Jobs,
    backends: Backends,
    global_jobs: ResourceCounter,
    started: AtomicBool,
}

/// A lookup-only reference back to the owning engine, held by each
/// [`Job`]. Deliberately weak: the engine owns its jobs through
/// [`Jobs`], so a job holding a strong reference back would form a
/// cycle that never deallocates.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Weak<EngineInner>,
}

impl EngineHandle {
    fn upgrade(&self) -> Option<Arc<EngineInner>> {
        self.inner.upgrade()
    }

    /// A slot is free only when both the engine-global counter and the
    /// requested kind's own counter have capacity (spec §4.4).
    pub fn has_resource(&self, kind: BackendKind) -> bool {
        self.upgrade()
            .map(|inner| inner.global_jobs.has_capacity() && inner.backends.for_kind(kind).has_capacity())
            .unwrap_or(false)
    }

    /// Debits both the engine-global counter and the kind's own
    /// counter; rolls the global debit back if the per-kind acquire
    /// fails, so a failed admission never leaks a global slot.
    pub fn consume_resource(&self, kind: BackendKind) -> bool {
        let Some(inner) = self.upgrade() else {
            return false;
        };
        if !inner.global_jobs.acquire() {
            return false;
        }
        if inner.backends.for_kind(kind).acquire() {
            true
        } else {
            inner.global_jobs.release();
            false
        }
    }

    /// Credits both counters back (spec §4.4).
    pub fn release_resource(&self, kind: BackendKind) {
        if let Some(inner) = self.upgrade() {
            inner.backends.for_kind(kind).release();
            inner.global_jobs.release();
        }
    }

    pub async fn cancel_runtime(&self, kind: BackendKind, job_id: &JobId) {
        if let Some(inner) = self.upgrade() {
            inner.backends.for_kind(kind).cancel(job_id).await;
        }
    }

    /// The `<engine-cache>` root jobs' per-id directories live under
    /// (spec §6 "Per-job cache layout"). Available regardless of
    /// `cache_type`, since output capture is independent of whether
    /// status snapshots are persisted.
    pub fn cache_dir(&self) -> PathBuf {
        self.upgrade()
            .map(|inner| inner.cache_path.clone())
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn print_traceback(&self) -> bool {
        self.upgrade()
            .map(|inner| inner.settings.print_traceback)
            .unwrap_or(true)
    }

    /// Submit a job from code already running inside the engine — a
    /// job that received itself injected (`JobSpec::inject_engine`), most
    /// notably the sentinel/cron facet (`backend::sentinel`) submitting
    /// a fresh inner job each time its condition is satisfied. Identical
    /// in effect to [`Engine::submit`], implemented directly against the
    /// upgraded [`EngineInner`] since a job only ever holds the weak
    /// handle, never the owning `Engine`.
    pub async fn submit_async(&self, job: Arc<Job>) -> Result<()> {
        let Some(inner) = self.upgrade() else {
            return Err(EngineError::configuration("engine no longer exists"));
        };
        if !inner.started.load(Ordering::SeqCst) {
            return Err(EngineError::configuration(
                "engine must be started before submitting jobs",
            ));
        }
        inner.jobs.add(job.clone());
        job.bind_engine(self.clone())?;
        job.emit().await
    }

    /// Hook called on every validated status transition. Used today
    /// only for structured logging; an engine configured with
    /// `cache_type = Disk` could additionally trigger an incremental
    /// snapshot here.
    pub fn notify_status_change(&self, job_id: &JobId, old: Status, new: Status) {
        info!(job = %job_id, from = %old, to = %new, "job status changed");
    }
}

impl EngineSnapshot for EngineHandle {
    fn status_of(&self, job_id: &JobId) -> Option<Status> {
        self.upgrade().and_then(|inner| inner.jobs.status_of(job_id))
    }
}

/// The job execution engine: submits jobs, supervises their admission
/// and completion, and owns the resource pools backends draw from.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(settings: EngineSetting) -> Self {
        let id = EngineId::new();
        let cache_path = settings
            .cache_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".executor").join(id.as_str()));
        let backends = Backends {
            local: LocalBackend::new(),
            thread: ThreadBackend::new(unbounded_as_zero(settings.max_thread_jobs)),
            process: ProcessBackend::new(unbounded_as_zero(settings.max_process_jobs)),
            distributed: DistributedBackend::new(unbounded_as_zero(settings.max_distributed_jobs)),
        };
        let global_jobs = ResourceCounter::new(settings.max_jobs as i64);
        Self {
            inner: Arc::new(EngineInner {
                id,
                settings,
                cache_path,
                jobs: Jobs::new(),
                global_jobs,
                backends,
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &EngineId {
        &self.inner.id
    }

    fn handle(&self) -> EngineHandle {
        EngineHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// `start()`: marks the engine ready to accept submissions and, if
    /// `cache_type = Disk`, restores jobs from a prior snapshot (spec §6
    /// "Persistence format"). Active jobs in a restored snapshot are not
    /// auto-resumed — see DESIGN.md.
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::configuration("engine already started"));
        }
        std::fs::create_dir_all(&self.inner.cache_path)?;
        if self.inner.settings.cache_type == CacheType::Disk {
            let restored = persistence::load_snapshot(&self.inner.cache_path)?;
            info!(count = restored.len(), "restored job snapshots from disk");
        }
        info!(engine = %self.inner.id, "engine started");
        Ok(())
    }

    /// `stop()`: stops accepting new work and cancels everything
    /// still active. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel_all().await;
        if self.inner.settings.cache_type == CacheType::Disk {
            let snapshot = persistence::snapshot_of(&self.inner.jobs);
            persistence::save_snapshot(&self.inner.cache_path, &snapshot)?;
        }
        info!(engine = %self.inner.id, "engine stopped");
        Ok(())
    }

    fn ensure_started(&self) -> Result<()> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(EngineError::configuration(
                "engine must be started before submitting jobs",
            ));
        }
        Ok(())
    }

    /// `submit(job)`: registers a job with this engine and begins its
    /// supervisory task (spec §4.2 "Submit contract").
    pub async fn submit(&self, job: Arc<Job>) -> Result<()> {
        self.ensure_started()?;
        self.inner.jobs.add(job.clone());
        job.bind_engine(self.handle())?;
        job.emit().await
    }

    /// Alias kept for callers that want to make the async boundary
    /// explicit at the call site; identical to [`Engine::submit`].
    pub async fn submit_async(&self, job: Arc<Job>) -> Result<()> {
        self.submit(job).await
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.inner.jobs.get(id)
    }

    pub fn all_jobs(&self) -> Vec<Arc<Job>> {
        self.inner.jobs.all_jobs()
    }

    /// Block until `job` reaches a terminal state, or `timeout` elapses.
    pub async fn wait_job(&self, job: &Arc<Job>, timeout: Option<Duration>) -> Result<()> {
        job.join(timeout).await;
        if job.status() == Status::Cancelled {
            return Err(EngineError::Cancellation(job.id().to_string()));
        }
        Ok(())
    }

    /// Block until every currently-tracked active job reaches a
    /// terminal state, or `timeout` elapses.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let active = self.inner.jobs.active_jobs();
            if active.is_empty() {
                return Ok(());
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Err(EngineError::configuration("timed out waiting for jobs"));
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Convenience alias matching the submit/wait naming pair.
    pub async fn wait_async(&self, timeout: Option<Duration>) -> Result<()> {
        self.wait(timeout).await
    }

    /// Block until every tracked job (active or not) has been joined;
    /// used by the scoped `run_until_complete`-style helpers.
    pub async fn join(&self) {
        for job in self.inner.jobs.all_jobs() {
            job.join(None).await;
        }
    }

    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        match self.inner.jobs.get(id) {
            Some(job) => job.cancel().await,
            None => Err(EngineError::validation(format!("unknown job {id}"))),
        }
    }

    pub async fn cancel_all(&self) {
        for job in self.inner.jobs.active_jobs() {
            if let Err(e) = job.cancel().await {
                warn!(job = %job.id(), error = %e, "failed to cancel job during shutdown");
            }
        }
    }

    /// Drop a terminal job from the manager; refuses to remove an
    /// active job to avoid orphaning its supervisory task.
    pub fn remove(&self, id: &JobId) -> Result<()> {
        let job = self
            .inner
            .jobs
            .get(id)
            .ok_or_else(|| EngineError::validation(format!("unknown job {id}")))?;
        if !job.status().is_terminal() {
            return Err(EngineError::invalid_state(format!(
                "job {id} is still active, cancel it before removing"
            )));
        }
        self.inner.jobs.remove(id);
        Ok(())
    }

    pub fn clear(&self, statuses: &[Status]) {
        self.inner.jobs.clear(statuses);
    }

    pub fn clear_non_active(&self) {
        self.inner.jobs.clear_non_active();
    }

    /// Runs `body` against a freshly started engine, guaranteeing
    /// `stop()` on every exit path — a normal return, an `Err`, or a
    /// panic unwinding out of `body` (spec §9 "Scoped acquisition").
    pub async fn scoped<F, Fut, T>(settings: EngineSetting, body: F) -> Result<T>
    where
        F: FnOnce(Engine) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let engine = Engine::new(settings);
        engine.start().await?;
        let outcome = AssertUnwindSafe(body(engine.clone())).catch_unwind().await;
        engine.stop().await?;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Engine(id={}, jobs={}, started={})",
            self.inner.id,
            self.inner.jobs.len(),
            self.inner.started.load(Ordering::SeqCst)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FnJob, JobBody, JobOutput, JobSpec};

    #[tokio::test]
    async fn submitting_before_start_is_rejected() {
        let engine = Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join("engine_core_test_no_start")),
            ..EngineSetting::default()
        });
        let job = Job::new(JobSpec {
            body: JobBody::Function(Arc::new(FnJob(|_args: Vec<JobOutput>| async {
                Ok(Arc::new(()) as JobOutput)
            }))),
            ..JobSpec::default()
        });
        assert!(engine.submit(job).await.is_err());
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let engine = Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join("engine_core_test_double_start")),
            ..EngineSetting::default()
        });
        engine.start().await.unwrap();
        assert!(engine.start().await.is_err());
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn wait_returns_once_all_active_jobs_are_terminal() {
        let engine = Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join("engine_core_test_wait")),
            ..EngineSetting::default()
        });
        engine.start().await.unwrap();
        let job = Job::new(JobSpec {
            body: JobBody::Function(Arc::new(FnJob(|_args: Vec<JobOutput>| async {
                Ok(Arc::new(7_i64) as JobOutput)
            }))),
            ..JobSpec::default()
        });
        engine.submit(job.clone()).await.unwrap();
        engine.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(job.status(), Status::Done);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn scoped_stops_the_engine_after_a_successful_body() {
        let settings = EngineSetting {
            cache_path: Some(std::env::temp_dir().join("engine_core_test_scoped_ok")),
            ..EngineSetting::default()
        };
        let result = Engine::scoped(settings, |engine| async move {
            let job = Job::new(JobSpec {
                body: JobBody::Function(Arc::new(FnJob(|_args: Vec<JobOutput>| async {
                    Ok(Arc::new(9_i64) as JobOutput)
                }))),
                ..JobSpec::default()
            });
            engine.submit(job.clone()).await?;
            engine.wait(Some(Duration::from_secs(5))).await?;
            Ok(*job.result()?.downcast_ref::<i64>().unwrap())
        })
        .await
        .unwrap();
        assert_eq!(result, 9);
    }

    #[tokio::test]
    async fn scoped_stops_the_engine_even_when_body_panics() {
        let settings = EngineSetting {
            cache_path: Some(std::env::temp_dir().join("engine_core_test_scoped_panic")),
            ..EngineSetting::default()
        };
        let outcome = std::panic::AssertUnwindSafe(Engine::scoped(settings, |_engine| async move {
            panic!("body blew up");
            #[allow(unreachable_code)]
            Ok(())
        }))
        .catch_unwind()
        .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn max_jobs_of_zero_admits_nothing() {
        let engine = Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join("engine_core_test_max_jobs_zero")),
            max_jobs: 0,
            ..EngineSetting::default()
        });
        engine.start().await.unwrap();
        let job = Job::new(JobSpec {
            body: JobBody::Function(Arc::new(FnJob(|_args: Vec<JobOutput>| async {
                Ok(Arc::new(()) as JobOutput)
            }))),
            ..JobSpec::default()
        });
        engine.submit(job.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(job.status(), Status::Pending);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn global_cap_gates_thread_backed_jobs_too() {
        let engine = Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join("engine_core_test_global_cap_thread")),
            max_jobs: 1,
            max_thread_jobs: Some(5),
            ..EngineSetting::default()
        });
        engine.start().await.unwrap();

        let blocker = Job::new(JobSpec {
            backend_kind: BackendKind::Thread,
            body: JobBody::Function(Arc::new(FnJob(|_args: Vec<JobOutput>| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(Arc::new(()) as JobOutput)
            }))),
            ..JobSpec::default()
        });
        let second = Job::new(JobSpec {
            backend_kind: BackendKind::Thread,
            body: JobBody::Function(Arc::new(FnJob(|_args: Vec<JobOutput>| async {
                Ok(Arc::new(()) as JobOutput)
            }))),
            ..JobSpec::default()
        });

        engine.submit(blocker.clone()).await.unwrap();
        engine.submit(second.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            second.status(),
            Status::Pending,
            "thread backend has its own free slots, but the global cap of 1 is held by `blocker`"
        );

        engine.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(blocker.status(), Status::Done);
        assert_eq!(second.status(), Status::Done);
        engine.stop().await.unwrap();
    }
}
