//! The job state machine (spec §4.2).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_ids::JobId;
use tracing::{error, info, warn};

use crate::backend::{BackendKind, JobOutcome};
use crate::condition::Condition;
use crate::engine::EngineHandle;
use crate::error::{EngineError, Result};

use super::decorators::{CaptureOutErr, ChDir};
use super::future::{DoneCallback, ErrorCallback, JobFuture, JobOutput};
use super::generator::{GeneratorHandle, GeneratorStep, JobGenerator};
use super::status::Status;

/// Extract the final output values out of a fully-resolved argument
/// vector. By the time this runs every `JobArg::Future` has already
/// been replaced with the producer's result in `resolve_args`; a
/// `Future` surviving to this point only happens for a job with no
/// declared dependencies passing one in directly, which resolves to
/// whatever the producer has recorded so far (or unit if none).
fn resolved_outputs(args: Vec<JobArg>) -> Vec<JobOutput> {
    args.into_iter()
        .map(|arg| match arg {
            JobArg::Value(v) => v,
            JobArg::Future(f) => f.result().unwrap_or_else(|| Arc::new(())),
        })
        .collect()
}

/// A job's callable: takes its resolved arguments and produces a result
/// or fails. Implemented by hand for closures via [`FnJob`], or directly
/// for more elaborate callables (e.g. ones that spawn a generator).
#[async_trait]
pub trait JobFn: Send + Sync {
    async fn call(&self, args: Vec<JobOutput>) -> anyhow::Result<JobOutput>;
}

/// Adapts a plain async closure into a [`JobFn`].
pub struct FnJob<F>(pub F);

#[async_trait]
impl<F, Fut> JobFn for FnJob<F>
where
    F: Fn(Vec<JobOutput>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<JobOutput>> + Send,
{
    async fn call(&self, args: Vec<JobOutput>) -> anyhow::Result<JobOutput> {
        (self.0)(args).await
    }
}

/// A generator-producing callable: called once to obtain the live
/// generator, which is then driven by repeated `next`/`send` calls
/// (spec §4.2 "Generators").
#[async_trait]
pub trait JobGenFn: Send + Sync {
    async fn call(&self, args: Vec<JobOutput>) -> anyhow::Result<Box<dyn JobGenerator>>;
}

/// The body of a job: an ordinary callable, or a generator factory.
///
/// Cloneable because a sentinel job (spec §4.4, `backend::sentinel`)
/// submits a fresh inner job from the same template on every tick —
/// cheap, since both variants only clone an `Arc`.
#[derive(Clone)]
pub enum JobBody {
    Function(Arc<dyn JobFn>),
    Generator(Arc<dyn JobGenFn>),
}

/// A single positional or keyword-style argument to a job. [`JobArg::Future`]
/// declares a data dependency on the producing job (spec §4.2 "Dependency
/// resolution", §9 "Dependency discovery" — containers are not descended
/// into, so a future nested inside a list is not a dependency).
#[derive(Clone)]
pub enum JobArg {
    Value(JobOutput),
    Future(JobFuture),
}

impl JobArg {
    pub fn value(v: impl std::any::Any + Send + Sync) -> Self {
        Self::Value(Arc::new(v))
    }
}

/// A tracked unit of deferred work bound to exactly one engine.
pub struct Job {
    id: JobId,
    name: String,
    engine: Mutex<Option<EngineHandle>>,
    body: JobBody,
    args: Mutex<Vec<JobArg>>,
    status: Mutex<Status>,
    backend_kind: BackendKind,
    condition: Mutex<Option<Condition>>,
    dep_job_ids: Mutex<Vec<JobId>>,
    retries: u32,
    retry_count: AtomicU32,
    retry_time_delta: Duration,
    wait_time_delta: Duration,
    redirect_out_err: bool,
    change_dir: bool,
    inject_engine: bool,
    pub future: JobFuture,
    done_callbacks: Mutex<Vec<DoneCallback>>,
    error_callbacks: Mutex<Vec<ErrorCallback>>,
    generator: Mutex<Option<GeneratorHandle>>,
    created_at: DateTime<Utc>,
    submitted_at: Mutex<Option<DateTime<Utc>>>,
    stopped_at: Mutex<Option<DateTime<Utc>>>,
    cancel_flag: Arc<std::sync::atomic::AtomicBool>,
}

/// Construction parameters for a new job, gathered up front so
/// `Job::new` doesn't take a dozen positional arguments.
pub struct JobSpec {
    pub name: String,
    pub body: JobBody,
    pub args: Vec<JobArg>,
    pub backend_kind: BackendKind,
    pub condition: Option<Condition>,
    pub retries: u32,
    pub retry_time_delta: Duration,
    pub wait_time_delta: Duration,
    pub redirect_out_err: bool,
    pub change_dir: bool,
    /// Request the bound engine as a trailing argument, the idiomatic
    /// stand-in for the original's `kwargs_inject_key` named-parameter
    /// injection — Rust's positional `Vec<JobOutput>` args have no
    /// named-parameter slot to bind by name, so the callable receives
    /// the `EngineHandle` as its last argument instead (see DESIGN.md).
    pub inject_engine: bool,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            name: "job".to_string(),
            body: JobBody::Function(Arc::new(FnJob(|_args: Vec<JobOutput>| async {
                Ok(Arc::new(()) as JobOutput)
            }))),
            args: Vec::new(),
            backend_kind: BackendKind::Local,
            condition: None,
            retries: 0,
            retry_time_delta: Duration::from_secs(0),
            wait_time_delta: Duration::from_millis(10),
            redirect_out_err: false,
            change_dir: false,
            inject_engine: false,
        }
    }
}

impl Job {
    pub fn new(spec: JobSpec) -> Arc<Self> {
        let id = JobId::new();
        Arc::new(Self {
            id: id.clone(),
            name: spec.name,
            engine: Mutex::new(None),
            body: spec.body,
            args: Mutex::new(spec.args),
            status: Mutex::new(Status::Created),
            backend_kind: spec.backend_kind,
            condition: Mutex::new(spec.condition),
            dep_job_ids: Mutex::new(Vec::new()),
            retries: spec.retries,
            retry_count: AtomicU32::new(0),
            retry_time_delta: spec.retry_time_delta,
            wait_time_delta: spec.wait_time_delta,
            redirect_out_err: spec.redirect_out_err,
            change_dir: spec.change_dir,
            inject_engine: spec.inject_engine,
            future: JobFuture::new(id),
            done_callbacks: Mutex::new(Vec::new()),
            error_callbacks: Mutex::new(Vec::new()),
            generator: Mutex::new(None),
            created_at: Utc::now(),
            submitted_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
            cancel_flag: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    pub fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        *self.stopped_at.lock().unwrap()
    }

    pub fn dep_job_ids(&self) -> Vec<JobId> {
        self.dep_job_ids.lock().unwrap().clone()
    }

    pub fn add_done_callback(&self, cb: DoneCallback) {
        self.done_callbacks.lock().unwrap().push(cb);
    }

    pub fn add_error_callback(&self, cb: ErrorCallback) {
        self.error_callbacks.lock().unwrap().push(cb);
    }

    /// `result()`: the job's result, valid only when `status == done`
    /// (spec §7, §8).
    pub fn result(&self) -> Result<JobOutput> {
        if self.status() != Status::Done {
            return Err(EngineError::invalid_state(format!(
                "job {} is not done",
                self.id
            )));
        }
        self.future
            .result()
            .ok_or_else(|| EngineError::invalid_state(format!("job {} has no result", self.id)))
    }

    pub fn exception(&self) -> Option<Arc<anyhow::Error>> {
        self.future.exception()
    }

    /// Transition to a new status, validating against the table and
    /// notifying the owning engine's manager so it migrates stores
    /// (spec §4.2 submit/transition contract).
    fn transition(&self, next: Status) -> Result<()> {
        let mut guard = self.status.lock().unwrap();
        guard.validate_transition(next)?;
        let old = *guard;
        *guard = next;
        drop(guard);
        if next.is_terminal() {
            *self.stopped_at.lock().unwrap() = Some(Utc::now());
        }
        if let Some(engine) = self.engine_handle() {
            engine.notify_status_change(&self.id, old, next);
        }
        Ok(())
    }

    fn engine_handle(&self) -> Option<EngineHandle> {
        self.engine.lock().unwrap().clone()
    }

    /// Bind this job to an engine on first submit, per the submit
    /// contract (spec §4.2).
    pub(crate) fn bind_engine(self: &Arc<Self>, engine: EngineHandle) -> Result<()> {
        let mut guard = self.engine.lock().unwrap();
        if guard.is_none() {
            *guard = Some(engine);
        }
        drop(guard);
        self.transition(Status::Pending)?;
        *self.submitted_at.lock().unwrap() = Some(Utc::now());
        Ok(())
    }

    /// `rerun()`: moves a terminal job back to `pending` and re-emits it.
    /// Per the Open Question in spec §9, this implementation resets the
    /// retry budget — see DESIGN.md.
    pub async fn rerun(self: &Arc<Self>) -> Result<()> {
        let status = self.status();
        if !status.is_terminal() {
            return Err(EngineError::invalid_state(format!(
                "job {} is not in a terminal state, cannot rerun",
                self.id
            )));
        }
        self.retry_count.store(0, Ordering::SeqCst);
        self.transition(Status::Pending)?;
        self.emit().await
    }

    /// Resolve `JobFuture` arguments into the auto-added dependency
    /// condition, combined with any user condition via `AllSatisfied`
    /// (spec §4.2 "Dependency resolution").
    fn resolve_dependencies(&self) {
        let args = self.args.lock().unwrap();
        let dep_ids: Vec<JobId> = args
            .iter()
            .filter_map(|a| match a {
                JobArg::Future(f) => Some(f.job_id().clone()),
                JobArg::Value(_) => None,
            })
            .collect();
        drop(args);
        if dep_ids.is_empty() {
            return;
        }
        let after_others = Condition::after_others(
            dep_ids.clone(),
            crate::condition::terminal_statuses(),
            crate::condition::JoinMode::All,
        );
        let mut cond = self.condition.lock().unwrap();
        *cond = Some(match cond.take() {
            Some(existing) => existing.and(after_others),
            None => after_others,
        });
        *self.dep_job_ids.lock().unwrap() = dep_ids;
    }

    /// `emit()`: starts the supervisory task. The job must be `pending`.
    pub async fn emit(self: &Arc<Self>) -> Result<()> {
        if self.status() != Status::Pending {
            return Err(EngineError::invalid_state(format!(
                "job {} is not pending, cannot emit",
                self.id
            )));
        }
        self.resolve_dependencies();
        info!(job = %self.id, "emitting job, waiting for admission");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.wait_and_run().await;
        });
        Ok(())
    }

    /// The supervisory loop: poll condition + resources until admission,
    /// resolve dependency args, run the backend, then dispatch
    /// success/failure (spec §4.2 "Emit contract").
    async fn wait_and_run(self: Arc<Self>) {
        loop {
            if self.cancel_flag.load(Ordering::SeqCst) {
                let _ = self.transition(Status::Cancelled);
                return;
            }
            let Some(engine) = self.engine_handle() else {
                return;
            };
            let condition_ok = match self.condition.lock().unwrap().as_ref() {
                Some(c) => c.satisfy(&engine),
                None => true,
            };
            if condition_ok && engine.has_resource(self.backend_kind) {
                if !engine.consume_resource(self.backend_kind) {
                    tokio::time::sleep(self.wait_time_delta).await;
                    continue;
                }
                break;
            }
            tokio::time::sleep(self.wait_time_delta).await;
        }

        match self.resolve_args().await {
            Ok(resolved) => {
                if let Err(cancelled_because) = resolved {
                    warn!(job = %self.id, upstream = %cancelled_because, "cancelling: upstream job did not complete successfully");
                    self.release_resource();
                    let _ = self.transition(Status::Cancelled);
                    return;
                }
            }
            Err(e) => {
                error!(job = %self.id, error = %e, "failed resolving dependency arguments");
                self.release_resource();
                self.on_failed(e).await;
                return;
            }
        }

        if let Err(e) = self.transition(Status::Running) {
            error!(job = %self.id, error = %e, "failed to enter running state");
            self.release_resource();
            return;
        }

        let mut args = resolved_outputs(std::mem::take(&mut *self.resolved_args_storage()));
        if self.inject_engine {
            if let Some(engine) = self.engine_handle() {
                args.push(Arc::new(engine) as JobOutput);
            }
        }
        match &self.body {
            JobBody::Function(f) => {
                let callable = self.decorate(f.clone());
                match callable.call(args).await {
                    Ok(result) => self.on_done(result).await,
                    Err(e) => {
                        self.release_resource();
                        self.on_failed(e).await;
                    }
                }
            }
            JobBody::Generator(g) => match g.call(args).await {
                Ok(generator) => {
                    let handle = GeneratorHandle::spawn(AsDrivable(generator));
                    *self.generator.lock().unwrap() = Some(handle.clone());
                    self.drive_generator_to_completion(handle).await;
                }
                Err(e) => {
                    self.release_resource();
                    self.on_failed(e).await;
                }
            },
        }
    }

    /// Temporary storage slot; `resolve_args` writes the final argument
    /// vector here so `wait_and_run` can hand it to the backend call
    /// without holding the args mutex across an await point.
    fn resolved_args_storage(&self) -> std::sync::MutexGuard<'_, Vec<JobArg>> {
        self.args.lock().unwrap()
    }

    /// Drive an already-started generator job to completion, treating
    /// an explicit `next()` loop as the job body: the job stays
    /// `running` until the generator is exhausted or raises.
    async fn drive_generator_to_completion(self: &Arc<Self>, handle: GeneratorHandle) {
        loop {
            match handle.next().await {
                GeneratorStep::Yielded(_) => continue,
                GeneratorStep::Done(v) => {
                    self.on_done(v).await;
                    return;
                }
                GeneratorStep::Failed(e) => {
                    self.release_resource();
                    self.on_failed(e).await;
                    return;
                }
            }
        }
    }

    /// Returns `Ok(Ok(()))` when args resolved normally, `Ok(Err(job_id))`
    /// when an upstream producer reached a terminal non-`done` status
    /// (meaning this job must cancel instead of run), or `Err` on an
    /// internal error.
    async fn resolve_args(&self) -> Result<std::result::Result<(), JobId>> {
        if self.dep_job_ids().is_empty() {
            return Ok(Ok(()));
        }
        let mut args = self.args.lock().unwrap();
        let mut resolved = Vec::with_capacity(args.len());
        for arg in args.drain(..) {
            match arg {
                JobArg::Value(v) => resolved.push(JobArg::Value(v)),
                JobArg::Future(fut) => {
                    if let Some(result) = fut.result() {
                        resolved.push(JobArg::Value(result));
                    } else {
                        // Producer is failed or cancelled: this job cannot run.
                        return Ok(Err(fut.job_id().clone()));
                    }
                }
            }
        }
        *args = resolved;
        Ok(Ok(()))
    }

    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.engine_handle().map(|e| e.cache_dir().join(self.id.as_str()))
    }

    /// Wrap the job's undecorated body for one execution. Because
    /// `self.body` is never mutated in place, every call — including a
    /// `rerun` — wraps exactly once from the original callable, so the
    /// at-most-once guarantee decorators need falls out of the control
    /// flow rather than needing a separate "already applied" flag.
    fn decorate(self: &Arc<Self>, inner: Arc<dyn JobFn>) -> Arc<dyn JobFn> {
        let mut wrapped = inner;
        let Some(cache_dir) = self.cache_dir() else {
            return wrapped;
        };
        if self.change_dir {
            wrapped = Arc::new(ChDir::new(wrapped, cache_dir.clone()));
        }
        if self.redirect_out_err {
            wrapped = Arc::new(CaptureOutErr::new(wrapped, cache_dir));
        }
        wrapped
    }

    async fn on_done(self: &Arc<Self>, result: JobOutput) {
        info!(job = %self.id, "job done");
        self.future.set_result(result.clone());
        let callbacks = { self.done_callbacks.lock().unwrap().clone() };
        for cb in callbacks {
            cb(result.clone()).await;
        }
        self.release_resource();
        let _ = self.transition(Status::Done);
    }

    async fn on_failed(self: &Arc<Self>, e: anyhow::Error) {
        if let Some(engine) = self.engine_handle() {
            if engine.print_traceback() {
                error!(job = %self.id, error = format!("{e:#}"), "job failed");
            } else {
                warn!(job = %self.id, "job failed");
            }
        }
        let shared = Arc::new(e);
        self.future.set_exception(shared.clone());
        let callbacks = { self.error_callbacks.lock().unwrap().clone() };
        for cb in callbacks {
            cb(shared.clone()).await;
        }
        let _ = self.transition(Status::Failed);

        let retry_count = self.retry_count.fetch_add(1, Ordering::SeqCst);
        if retry_count < self.retries {
            tokio::time::sleep(self.retry_time_delta).await;
            if let Err(e) = self.retry().await {
                error!(job = %self.id, error = %e, "failed to rerun after retry");
            }
        }
    }

    /// Re-emit after an automatic retry, without resetting the retry
    /// budget `rerun()` resets for an explicit operator-initiated rerun
    /// — an automatic retry is still consuming the same budget, not
    /// starting a fresh one (spec §4.2, §8 "retries exhausted before
    /// terminal failure").
    async fn retry(self: &Arc<Self>) -> Result<()> {
        self.transition(Status::Pending)?;
        self.emit().await
    }

    fn release_resource(&self) {
        if let Some(engine) = self.engine_handle() {
            engine.release_resource(self.backend_kind);
        }
    }

    /// `cancel()`: cooperative cancellation (spec §4.2, §5).
    pub async fn cancel(self: &Arc<Self>) -> Result<()> {
        self.cancel_flag.store(true, Ordering::SeqCst);
        match self.status() {
            Status::Running => {
                if let Some(engine) = self.engine_handle() {
                    engine.cancel_runtime(self.backend_kind, &self.id).await;
                }
                self.release_resource();
                self.transition(Status::Cancelled)
            }
            Status::Pending => self.transition(Status::Cancelled),
            _ => Ok(()), // terminal states: no-op
        }
    }

    /// Block (async) until the job reaches a terminal state or the
    /// timeout elapses.
    pub async fn join(&self, timeout: Option<Duration>) {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            if self.status().is_terminal() {
                return;
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Adapts a boxed [`JobGenerator`] so it can be handed to
/// [`GeneratorHandle::spawn`], which expects an owned `JobGenerator`.
struct AsDrivable(Box<dyn JobGenerator>);

#[async_trait]
impl JobGenerator for AsDrivable {
    async fn advance(&mut self, value: Option<JobOutput>) -> GeneratorStep {
        self.0.advance(value).await
    }
}

impl JobOutcome for Job {
    fn job_id(&self) -> &JobId {
        &self.id
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Job(id={}, name={}, status={})", self.id, self.name, self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineSetting};

    fn add_job(a: i64, b: i64, deps: Vec<JobArg>, mut extra: Vec<JobArg>) -> Arc<Job> {
        let mut args = deps;
        args.append(&mut extra);
        let _ = (a, b);
        Job::new(JobSpec {
            name: "add".into(),
            body: JobBody::Function(Arc::new(FnJob(|args: Vec<JobOutput>| async move {
                let mut total = 0_i64;
                for a in args {
                    total += *a.downcast_ref::<i64>().unwrap();
                }
                Ok(Arc::new(total) as JobOutput)
            }))),
            args,
            ..JobSpec::default()
        })
    }

    fn test_engine(name: &str) -> Engine {
        Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join(format!("engine_core_test_{name}"))),
            ..EngineSetting::default()
        })
    }

    #[tokio::test]
    async fn square_job_completes_with_expected_result() {
        let engine = test_engine("square");
        engine.start().await.unwrap();
        let job = Job::new(JobSpec {
            name: "square".into(),
            body: JobBody::Function(Arc::new(FnJob(|args: Vec<JobOutput>| async move {
                let x = *args[0].downcast_ref::<i64>().unwrap();
                Ok(Arc::new(x * x) as JobOutput)
            }))),
            args: vec![JobArg::value(2_i64)],
            ..JobSpec::default()
        });
        engine.submit(job.clone()).await.unwrap();
        job.join(Some(Duration::from_secs(5))).await;
        assert_eq!(job.status(), Status::Done);
        let result = job.result().unwrap();
        assert_eq!(*result.downcast_ref::<i64>().unwrap(), 4);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn chained_futures_execute_in_dependency_order() {
        let engine = test_engine("chained");
        engine.start().await.unwrap();

        let job_a = add_job(1, 2, vec![JobArg::value(1_i64), JobArg::value(2_i64)], vec![]);
        let job_b = add_job(0, 3, vec![JobArg::Future(job_a.future.clone())], vec![JobArg::value(3_i64)]);
        let job_c = add_job(0, 4, vec![JobArg::Future(job_b.future.clone())], vec![JobArg::value(4_i64)]);

        // Submitted in reverse order.
        engine.submit(job_c.clone()).await.unwrap();
        engine.submit(job_b.clone()).await.unwrap();
        engine.submit(job_a.clone()).await.unwrap();

        job_c.join(Some(Duration::from_secs(5))).await;

        assert_eq!(job_a.status(), Status::Done);
        assert_eq!(job_b.status(), Status::Done);
        assert_eq!(job_c.status(), Status::Done);
        assert_eq!(*job_a.result().unwrap().downcast_ref::<i64>().unwrap(), 3);
        assert_eq!(*job_b.result().unwrap().downcast_ref::<i64>().unwrap(), 6);
        assert_eq!(*job_c.result().unwrap().downcast_ref::<i64>().unwrap(), 10);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn downstream_job_is_cancelled_when_upstream_fails() {
        let engine = test_engine("downstream");
        engine.start().await.unwrap();

        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked_clone = invoked.clone();

        let failing = Job::new(JobSpec {
            name: "fails".into(),
            body: JobBody::Function(Arc::new(FnJob(|_args: Vec<JobOutput>| async move {
                Err(anyhow::anyhow!("always fails"))
            }))),
            ..JobSpec::default()
        });
        let downstream = Job::new(JobSpec {
            name: "downstream".into(),
            body: JobBody::Function(Arc::new(FnJob(move |_args: Vec<JobOutput>| {
                let invoked = invoked_clone.clone();
                async move {
                    invoked.store(true, Ordering::SeqCst);
                    Ok(Arc::new(()) as JobOutput)
                }
            }))),
            args: vec![JobArg::Future(failing.future.clone())],
            ..JobSpec::default()
        });

        engine.submit(downstream.clone()).await.unwrap();
        engine.submit(failing.clone()).await.unwrap();

        downstream.join(Some(Duration::from_secs(5))).await;

        assert_eq!(failing.status(), Status::Failed);
        assert_eq!(downstream.status(), Status::Cancelled);
        assert!(!invoked.load(Ordering::SeqCst));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn retries_are_exhausted_before_terminal_failure() {
        let engine = test_engine("retries");
        engine.start().await.unwrap();

        let invocations = Arc::new(AtomicU32::new(0));
        let invocations_clone = invocations.clone();

        let job = Job::new(JobSpec {
            name: "always_fails".into(),
            body: JobBody::Function(Arc::new(FnJob(move |_args: Vec<JobOutput>| {
                let invocations = invocations_clone.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("nope"))
                }
            }))),
            retries: 2,
            retry_time_delta: Duration::from_millis(0),
            ..JobSpec::default()
        });

        engine.submit(job.clone()).await.unwrap();
        job.join(Some(Duration::from_secs(5))).await;

        assert_eq!(job.status(), Status::Failed);
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn inject_engine_appends_a_handle_as_the_trailing_argument() {
        let engine = test_engine("inject_engine");
        engine.start().await.unwrap();
        let engine_id = engine.id().to_string();

        let job = Job::new(JobSpec {
            name: "wants_engine".into(),
            body: JobBody::Function(Arc::new(FnJob(|args: Vec<JobOutput>| async move {
                let handle = args
                    .last()
                    .expect("engine handle should be appended")
                    .downcast_ref::<EngineHandle>()
                    .expect("trailing argument should be an EngineHandle")
                    .clone();
                Ok(Arc::new(handle.cache_dir()) as JobOutput)
            }))),
            args: vec![JobArg::value(1_i64)],
            inject_engine: true,
            ..JobSpec::default()
        });

        engine.submit(job.clone()).await.unwrap();
        job.join(Some(Duration::from_secs(5))).await;

        assert_eq!(job.status(), Status::Done);
        let result = job.result().unwrap();
        let injected_cache_dir = result.downcast_ref::<PathBuf>().unwrap();
        assert!(injected_cache_dir.to_string_lossy().contains(&engine_id));
        engine.stop().await.unwrap();
    }

    #[test]
    fn display_includes_name_and_status() {
        let job = Job::new(JobSpec {
            name: "formatted".into(),
            ..JobSpec::default()
        });
        let rendered = job.to_string();
        assert!(rendered.contains("formatted"));
        assert!(rendered.contains("created"));
    }
}
