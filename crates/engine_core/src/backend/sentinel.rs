//! The sentinel/cron job facet (spec §4.4 extension, Glossary
//! "Sentinel/cron job"): a local job whose body polls a condition
//! forever, submitting a fresh inner job every time the condition is
//! satisfied, rather than rerunning itself.
//!
//! Grounded on `executor/engine/job/extend/sentinel.py`: `SentinelJob`
//! builds a job whose async body is `while True: if condition.satisfy(
//! engine): submit_async(base_class(func, **attrs)); sleep(time_delta)`.
//! [`sentinel_job`] is the same shape, using [`JobSpec::inject_engine`]
//! to get the `EngineHandle` the Python original receives as its
//! `__engine__`-injected parameter, and `JobBody`/`JobArg`'s `Clone` to
//! rebuild the inner job's template on every tick.
//!
//! `executor/engine/job/extend/cron.py` is a thin wrapper over
//! `SentinelJob` that supplies a time-based `Condition` as the sentinel
//! condition; [`cron_job`] does the same rather than being its own file.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::BackendKind;
use crate::condition::Condition;
use crate::engine::EngineHandle;
use crate::job::{Job, JobArg, JobBody, JobFn, JobOutput, JobSpec};

/// The inner job template a sentinel resubmits every time its condition
/// is satisfied.
struct InnerTemplate {
    name: String,
    body: JobBody,
    args: Vec<JobArg>,
    backend_kind: BackendKind,
    condition: Option<Condition>,
    retries: u32,
    retry_time_delta: Duration,
    redirect_out_err: bool,
    change_dir: bool,
}

impl InnerTemplate {
    fn instantiate(&self) -> Arc<Job> {
        Job::new(JobSpec {
            name: self.name.clone(),
            body: self.body.clone(),
            args: self.args.clone(),
            backend_kind: self.backend_kind,
            condition: self.condition.clone(),
            retries: self.retries,
            retry_time_delta: self.retry_time_delta,
            redirect_out_err: self.redirect_out_err,
            change_dir: self.change_dir,
            ..JobSpec::default()
        })
    }
}

struct SentinelLoop {
    sentinel_condition: Condition,
    template: InnerTemplate,
    time_delta: Duration,
}

#[async_trait]
impl JobFn for SentinelLoop {
    async fn call(&self, args: Vec<JobOutput>) -> anyhow::Result<JobOutput> {
        let engine = args
            .last()
            .ok_or_else(|| anyhow::anyhow!("sentinel job requires an injected engine handle"))?
            .downcast_ref::<EngineHandle>()
            .ok_or_else(|| anyhow::anyhow!("trailing argument was not an EngineHandle"))?
            .clone();

        loop {
            if self.sentinel_condition.satisfy(&engine) {
                let inner = self.template.instantiate();
                engine.submit_async(inner).await?;
            }
            tokio::time::sleep(self.time_delta).await;
        }
    }
}

/// Construction parameters for [`sentinel_job`].
pub struct SentinelSpec {
    /// Checked on every tick; an inner job is submitted when satisfied.
    pub sentinel_condition: Condition,
    /// The callable each submitted inner job runs.
    pub body: JobBody,
    pub args: Vec<JobArg>,
    /// Name of the sentinel job itself, not the jobs it submits.
    pub name: String,
    /// Name given to each submitted inner job.
    pub inner_name: String,
    pub backend_kind: BackendKind,
    pub inner_condition: Option<Condition>,
    pub retries: u32,
    pub retry_time_delta: Duration,
    pub redirect_out_err: bool,
    pub change_dir: bool,
    /// How often the sentinel condition is polled.
    pub time_delta: Duration,
}

impl Default for SentinelSpec {
    fn default() -> Self {
        Self {
            sentinel_condition: Condition::every_period("1s", true)
                .expect("built-in duration string always parses"),
            body: JobBody::Function(Arc::new(crate::job::FnJob(|_args: Vec<JobOutput>| async {
                Ok(Arc::new(()) as JobOutput)
            }))),
            args: Vec::new(),
            name: "sentinel".to_string(),
            inner_name: "sentinel-job".to_string(),
            backend_kind: BackendKind::Process,
            inner_condition: None,
            retries: 0,
            retry_time_delta: Duration::from_secs(0),
            redirect_out_err: false,
            change_dir: false,
            time_delta: Duration::from_millis(10),
        }
    }
}

/// Build the always-running local job that drives a sentinel/cron
/// schedule: it never itself reaches a terminal status while active
/// (matching the original's `while True`), and must be cancelled
/// explicitly via [`Job::cancel`] to stop submitting new inner jobs.
pub fn sentinel_job(spec: SentinelSpec) -> Arc<Job> {
    let template = InnerTemplate {
        name: spec.inner_name,
        body: spec.body,
        args: spec.args,
        backend_kind: spec.backend_kind,
        condition: spec.inner_condition,
        retries: spec.retries,
        retry_time_delta: spec.retry_time_delta,
        redirect_out_err: spec.redirect_out_err,
        change_dir: spec.change_dir,
    };
    Job::new(JobSpec {
        name: spec.name,
        body: JobBody::Function(Arc::new(SentinelLoop {
            sentinel_condition: spec.sentinel_condition,
            template,
            time_delta: spec.time_delta,
        })),
        backend_kind: BackendKind::Local,
        inject_engine: true,
        ..JobSpec::default()
    })
}

/// `CronJob`: a sentinel whose condition is purely time-based. Sugar
/// over [`sentinel_job`], matching `cron.py` wrapping `SentinelJob`.
pub fn cron_job(time_condition: Condition, mut spec: SentinelSpec) -> Arc<Job> {
    spec.sentinel_condition = time_condition;
    sentinel_job(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineSetting};
    use crate::job::Status;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_engine(name: &str) -> Engine {
        Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join(format!("engine_core_test_sentinel_{name}"))),
            ..EngineSetting::default()
        })
    }

    #[tokio::test]
    async fn satisfied_condition_submits_inner_jobs_repeatedly() {
        let engine = test_engine("ticks");
        engine.start().await.unwrap();

        let ticks = Arc::new(AtomicU32::new(0));
        let ticks_clone = ticks.clone();

        let job = sentinel_job(SentinelSpec {
            sentinel_condition: Condition::every_period("1ms", true).unwrap(),
            body: JobBody::Function(Arc::new(crate::job::FnJob(move |_args: Vec<JobOutput>| {
                let ticks = ticks_clone.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(()) as JobOutput)
                }
            }))),
            backend_kind: BackendKind::Local,
            time_delta: Duration::from_millis(5),
            ..SentinelSpec::default()
        });

        engine.submit(job.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        job.cancel().await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unsatisfied_condition_never_submits() {
        let engine = test_engine("never");
        engine.start().await.unwrap();

        let ticks = Arc::new(AtomicU32::new(0));
        let ticks_clone = ticks.clone();

        let job = sentinel_job(SentinelSpec {
            sentinel_condition: Condition::every_period("1h", false).unwrap(),
            body: JobBody::Function(Arc::new(crate::job::FnJob(move |_args: Vec<JobOutput>| {
                let ticks = ticks_clone.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(()) as JobOutput)
                }
            }))),
            backend_kind: BackendKind::Local,
            time_delta: Duration::from_millis(5),
            ..SentinelSpec::default()
        });

        engine.submit(job.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        job.cancel().await.unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert_ne!(job.status(), Status::Done);
        engine.stop().await.unwrap();
    }
}
