//! [`JobFuture`]: a detachable, value-level handle to a job's eventual
//! result (spec §3 "JobFuture").

use std::any::Any;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use engine_ids::JobId;

/// A boxed, type-erased job result. Jobs are heterogeneous (any callable
/// returning anything), so results are carried as `Arc<dyn Any + Send + Sync>`
/// and downcast by callers that know the concrete type.
pub type JobOutput = Arc<dyn Any + Send + Sync>;

/// A pinned, boxed future, used for callbacks that may be sync or async.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// A done-callback: invoked with the job's result once it completes
/// successfully.
pub type DoneCallback = Arc<dyn Fn(JobOutput) -> BoxFuture<'static, ()> + Send + Sync>;

/// An error-callback: invoked with the job's failure.
pub type ErrorCallback = Arc<dyn Fn(Arc<anyhow::Error>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap a plain synchronous closure as a [`DoneCallback`].
pub fn sync_done_callback<F>(f: F) -> DoneCallback
where
    F: Fn(JobOutput) + Send + Sync + 'static,
{
    Arc::new(move |res| {
        f(res);
        Box::pin(std::future::ready(()))
    })
}

/// Wrap a plain synchronous closure as an [`ErrorCallback`].
pub fn sync_error_callback<F>(f: F) -> ErrorCallback
where
    F: Fn(Arc<anyhow::Error>) + Send + Sync + 'static,
{
    Arc::new(move |err| {
        f(err);
        Box::pin(std::future::ready(()))
    })
}

struct FutureState {
    result: Option<JobOutput>,
    exception: Option<Arc<anyhow::Error>>,
}

/// A shared, cloneable handle to a job's eventual outcome.
///
/// Writes (`set_result`/`set_exception`) happen exactly once, on the
/// engine's loop thread, strictly before the job's terminal transition
/// (spec §5 ordering guarantees). Any number of observers may hold a
/// clone; the underlying state outlives the originating [`crate::job::Job`]
/// if the job is removed from the manager.
///
/// A `JobFuture` is also a *dependency declaration*: passing one as an
/// argument to another job tells the engine to substitute the producer's
/// result at run time (spec §4.2 "Dependency resolution").
#[derive(Clone)]
pub struct JobFuture {
    job_id: JobId,
    state: Arc<Mutex<FutureState>>,
}

impl JobFuture {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: Arc::new(Mutex::new(FutureState {
                result: None,
                exception: None,
            })),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The last result, if the producing job ever completed successfully.
    pub fn result(&self) -> Option<JobOutput> {
        self.state.lock().unwrap().result.clone()
    }

    /// The last exception, if the producing job ever failed.
    pub fn exception(&self) -> Option<Arc<anyhow::Error>> {
        self.state.lock().unwrap().exception.clone()
    }

    pub fn set_result(&self, result: JobOutput) {
        let mut state = self.state.lock().unwrap();
        state.result = Some(result);
        state.exception = None;
    }

    pub fn set_exception(&self, exception: Arc<anyhow::Error>) {
        let mut state = self.state.lock().unwrap();
        state.exception = Some(exception);
        state.result = None;
    }
}

impl fmt::Debug for JobFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFuture")
            .field("job_id", &self.job_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_is_none_until_set() {
        let future = JobFuture::new(JobId::new());
        assert!(future.result().is_none());
        assert!(future.exception().is_none());
    }

    #[test]
    fn set_result_is_observable_through_clones() {
        let future = JobFuture::new(JobId::new());
        let observer = future.clone();
        future.set_result(Arc::new(42_i64));
        let got = observer.result().unwrap();
        assert_eq!(*got.downcast_ref::<i64>().unwrap(), 42);
    }

    #[test]
    fn set_exception_clears_any_prior_result() {
        let future = JobFuture::new(JobId::new());
        future.set_result(Arc::new(1_i64));
        future.set_exception(Arc::new(anyhow::anyhow!("boom")));
        assert!(future.result().is_none());
        assert!(future.exception().is_some());
    }
}
