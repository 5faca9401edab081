//! Pre-run decorators applied before the backend call (spec §4.2
//! "Pre-run decorators"): `change_dir` and `redirect_out_err`.
//!
//! Both are *at-most-once* wraps. The source detects this by checking the
//! wrapped callable's runtime type at decoration time; in Rust that would
//! require downcasting a trait object, which is not idiomatic here, so
//! [`super::core::Job`] instead wraps its undecorated callable fresh on
//! every execution (including a `rerun`) rather than storing a
//! progressively-wrapped one — see DESIGN.md.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::core::JobFn;
use super::future::JobOutput;

/// Process-wide lock serializing `chdir` calls, since the current
/// directory is global OS state shared by every in-process task.
///
/// `tokio::sync::Mutex`, not `std::sync::Mutex`: the guard is held
/// across `self.inner.call(args).await` below, and a `std::sync::MutexGuard`
/// is `!Send`, which would make the `#[async_trait]`-generated future
/// `!Send` and break `tokio::spawn` in `Job::wait_and_run`.
static CHDIR_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Wraps a callable to `chdir` into `dir` for the duration of the call,
/// restoring the previous working directory on every exit path.
pub struct ChDir {
    inner: std::sync::Arc<dyn JobFn>,
    dir: PathBuf,
}

impl ChDir {
    pub fn new(inner: std::sync::Arc<dyn JobFn>, dir: PathBuf) -> Self {
        Self { inner, dir }
    }
}

#[async_trait]
impl JobFn for ChDir {
    async fn call(&self, args: Vec<JobOutput>) -> anyhow::Result<JobOutput> {
        fs::create_dir_all(&self.dir)?;
        let _guard = CHDIR_LOCK.lock().await;
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(&self.dir)?;
        let result = self.inner.call(args).await;
        std::env::set_current_dir(&previous)?;
        result
    }
}

/// Wraps a callable to tee a copy of anything it writes into captured
/// log files at `<cache_dir>/stdout.txt` and `<cache_dir>/stderr.txt`.
///
/// Rust callables don't go through a process-global stdout/stderr the
/// way a Python function's `print` does, and swapping the process's own
/// fds would leak across every other concurrently-running job, so
/// capture here is explicit: the wrapped handles are appended as the
/// last two arguments the inner callable receives (`Arc<Mutex<File>>`
/// for stdout, then stderr) — a body that wants its output captured
/// downcasts and writes to them. The job's failure, when there is one,
/// is always recorded to `stderr.txt` regardless of whether the body
/// wrote to the handle itself.
pub struct CaptureOutErr {
    inner: std::sync::Arc<dyn JobFn>,
    cache_dir: PathBuf,
}

impl CaptureOutErr {
    pub fn new(inner: std::sync::Arc<dyn JobFn>, cache_dir: PathBuf) -> Self {
        Self { inner, cache_dir }
    }

    fn open(path: &Path) -> anyhow::Result<File> {
        Ok(File::create(path)?)
    }
}

#[async_trait]
impl JobFn for CaptureOutErr {
    async fn call(&self, mut args: Vec<JobOutput>) -> anyhow::Result<JobOutput> {
        fs::create_dir_all(&self.cache_dir)?;
        let stdout = std::sync::Arc::new(std::sync::Mutex::new(Self::open(
            &self.cache_dir.join("stdout.txt"),
        )?));
        let stderr = std::sync::Arc::new(std::sync::Mutex::new(Self::open(
            &self.cache_dir.join("stderr.txt"),
        )?));
        args.push(stdout as JobOutput);
        args.push(stderr.clone() as JobOutput);
        let result = self.inner.call(args).await;
        if let Err(e) = &result {
            writeln!(stderr.lock().unwrap(), "{e:#}")?;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl JobFn for Echo {
        async fn call(&self, args: Vec<JobOutput>) -> anyhow::Result<JobOutput> {
            Ok(args.into_iter().next().unwrap_or_else(|| Arc::new(())))
        }
    }

    #[tokio::test]
    async fn chdir_restores_previous_directory_on_success() {
        let tmp = tempfile::tempdir().unwrap();
        let before = std::env::current_dir().unwrap();
        let wrapped = ChDir::new(Arc::new(Echo), tmp.path().to_path_buf());
        wrapped.call(vec![Arc::new(1_i64)]).await.unwrap();
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[tokio::test]
    async fn capture_out_err_writes_stderr_file_on_failure() {
        struct Boom;
        #[async_trait]
        impl JobFn for Boom {
            async fn call(&self, _args: Vec<JobOutput>) -> anyhow::Result<JobOutput> {
                Err(anyhow::anyhow!("kaboom"))
            }
        }
        let tmp = tempfile::tempdir().unwrap();
        let wrapped = CaptureOutErr::new(Arc::new(Boom), tmp.path().to_path_buf());
        let _ = wrapped.call(vec![]).await;
        let stderr = std::fs::read_to_string(tmp.path().join("stderr.txt")).unwrap();
        assert!(stderr.contains("kaboom"));
    }

    #[tokio::test]
    async fn capture_out_err_routes_what_the_body_actually_writes() {
        struct Writes;
        #[async_trait]
        impl JobFn for Writes {
            async fn call(&self, args: Vec<JobOutput>) -> anyhow::Result<JobOutput> {
                let stdout = args[0]
                    .downcast_ref::<std::sync::Mutex<File>>()
                    .expect("stdout handle appended");
                writeln!(stdout.lock().unwrap(), "hello from the job")?;
                Ok(Arc::new(()))
            }
        }
        let tmp = tempfile::tempdir().unwrap();
        let wrapped = CaptureOutErr::new(Arc::new(Writes), tmp.path().to_path_buf());
        wrapped.call(vec![]).await.unwrap();
        let stdout = std::fs::read_to_string(tmp.path().join("stdout.txt")).unwrap();
        assert_eq!(stdout, "hello from the job\n");
    }
}
