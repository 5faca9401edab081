//! The launcher decorator and the process-default engine (spec §6).
//!
//! A [`Launcher`] binds a callable to a fixed backend and default job
//! attributes once, so call sites invoke it like an ordinary async
//! function rather than hand-building a [`JobSpec`] every time.
//! Invoking one submits a job to its engine, awaits it, and either
//! returns the result or re-raises — the one place in this crate a
//! job failure crosses back out as an error, per spec §7's propagation
//! policy.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::sync::RwLock;

use crate::backend::BackendKind;
use crate::engine::{Engine, EngineSetting};
use crate::error::{EngineError, Result};
use crate::job::{Job, JobArg, JobBody, JobFn, JobOutput, JobSpec};

static DEFAULT_ENGINE: OnceCell<RwLock<Option<Engine>>> = OnceCell::new();

fn default_engine_slot() -> &'static RwLock<Option<Engine>> {
    DEFAULT_ENGINE.get_or_init(|| RwLock::new(None))
}

/// The process-default engine, constructing and starting one with
/// default settings on first use if none was ever set.
pub async fn get_default_engine() -> Result<Engine> {
    {
        let guard = default_engine_slot().read().await;
        if let Some(engine) = guard.as_ref() {
            return Ok(engine.clone());
        }
    }
    let mut guard = default_engine_slot().write().await;
    if let Some(engine) = guard.as_ref() {
        return Ok(engine.clone());
    }
    let engine = Engine::new(EngineSetting::default());
    engine.start().await?;
    *guard = Some(engine.clone());
    Ok(engine)
}

/// Install `engine` as the process default, replacing any previous one.
/// Callers are responsible for stopping a previous default themselves
/// if it was already started.
pub async fn set_default_engine(engine: Engine) {
    *default_engine_slot().write().await = Some(engine);
}

/// A named, pre-configured entry point for submitting jobs of one
/// shape, bound to a specific backend and engine.
#[derive(Clone)]
pub struct Launcher {
    name: String,
    body: Arc<dyn JobFn>,
    backend_kind: BackendKind,
    retries: u32,
    retry_time_delta: Duration,
    engine: Option<Engine>,
}

impl Launcher {
    pub fn new(name: impl Into<String>, body: Arc<dyn JobFn>, backend_kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            body,
            backend_kind,
            retries: 0,
            retry_time_delta: Duration::from_secs(0),
            engine: None,
        }
    }

    pub fn with_retries(mut self, retries: u32, retry_time_delta: Duration) -> Self {
        self.retries = retries;
        self.retry_time_delta = retry_time_delta;
        self
    }

    /// Bind this launcher to a specific engine instead of the process
    /// default.
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    async fn engine(&self) -> Result<Engine> {
        match &self.engine {
            Some(engine) => Ok(engine.clone()),
            None => get_default_engine().await,
        }
    }

    fn build_job(&self, args: Vec<JobOutput>) -> Arc<Job> {
        Job::new(JobSpec {
            name: self.name.clone(),
            body: JobBody::Function(self.body.clone()),
            args: args.into_iter().map(JobArg::Value).collect(),
            backend_kind: self.backend_kind,
            retries: self.retries,
            retry_time_delta: self.retry_time_delta,
            ..JobSpec::default()
        })
    }

    /// `.submit(args…)`: enqueues a job and returns immediately without
    /// waiting for it.
    pub async fn submit(&self, args: Vec<JobOutput>) -> Result<Arc<Job>> {
        let engine = self.engine().await?;
        let job = self.build_job(args);
        engine.submit(job.clone()).await?;
        Ok(job)
    }

    /// Invoking a launcher submits and awaits the job, returning its
    /// result or re-raising its failure/cancellation.
    pub async fn call(&self, args: Vec<JobOutput>) -> Result<JobOutput> {
        let engine = self.engine().await?;
        let job = self.build_job(args);
        engine.submit(job.clone()).await?;
        job.join(None).await;
        match job.result() {
            Ok(result) => Ok(result),
            Err(_) => match job.exception() {
                Some(e) => Err(EngineError::validation(format!("job failed: {e:#}"))),
                None => Err(EngineError::Cancellation(job.id().to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnJob;

    #[tokio::test]
    async fn calling_a_launcher_returns_the_jobs_result() {
        let engine = Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join("engine_core_test_launcher_ok")),
            ..EngineSetting::default()
        });
        engine.start().await.unwrap();
        let launcher = Launcher::new(
            "double",
            Arc::new(FnJob(|args: Vec<JobOutput>| async move {
                let x = *args[0].downcast_ref::<i64>().unwrap();
                Ok(Arc::new(x * 2) as JobOutput)
            })),
            BackendKind::Local,
        )
        .with_engine(engine.clone());

        let result = launcher.call(vec![Arc::new(21_i64)]).await.unwrap();
        assert_eq!(*result.downcast_ref::<i64>().unwrap(), 42);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn calling_a_launcher_re_raises_the_jobs_failure() {
        let engine = Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join("engine_core_test_launcher_fail")),
            ..EngineSetting::default()
        });
        engine.start().await.unwrap();
        let launcher = Launcher::new(
            "boom",
            Arc::new(FnJob(|_args: Vec<JobOutput>| async move {
                Err(anyhow::anyhow!("launcher boom"))
            })),
            BackendKind::Local,
        )
        .with_engine(engine.clone());

        let err = launcher.call(vec![]).await.unwrap_err();
        assert!(err.to_string().contains("launcher boom"));
        engine.stop().await.unwrap();
    }
}
