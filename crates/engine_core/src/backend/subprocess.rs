//! The subprocess job facet (spec §4.4 extension, not excluded by the
//! Non-goals — only the distributed transport, the stdout/stderr
//! capture utility, and the webapp port handshake are out of scope):
//! a job whose body runs a shell command and fails if it exits nonzero.
//!
//! Grounded on `executor/engine/job/extend/subprocess.py`: the original
//! records the command line to `command.sh`, `chdir`s into the job's
//! cache directory, runs the command, and raises on a nonzero return
//! code. [`SubprocessJob`] does the same, relying on `change_dir: true`
//! (set by [`subprocess_job`] on the wrapping [`JobSpec`]) to have
//! already moved the current directory to the job's cache dir by the
//! time `call` runs — see [`super::super::job::decorators::ChDir`].
//!
//! Output capture is handled here directly via piped stdio rather than
//! through the generic `redirect_out_err` decorator, matching the
//! original's own `ProcessRunner`-based redirect in `process_func`;
//! [`subprocess_job`] therefore always builds its `JobSpec` with
//! `redirect_out_err: false` so the generic decorator never double-wraps.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::BackendKind;
use crate::condition::Condition;
use crate::job::{Job, JobBody, JobFn, JobOutput, JobSpec};

struct SubprocessJob {
    cmd: String,
    record_cmd: bool,
    redirect_out_err: bool,
}

#[async_trait]
impl JobFn for SubprocessJob {
    async fn call(&self, _args: Vec<JobOutput>) -> anyhow::Result<JobOutput> {
        let work_dir = std::env::current_dir()?;

        if self.record_cmd {
            tokio::fs::write(work_dir.join("command.sh"), format!("{}\n", self.cmd)).await?;
        }

        let parts = shlex::split(&self.cmd)
            .ok_or_else(|| anyhow::anyhow!("invalid command line: {}", self.cmd))?;
        let (program, rest) = parts
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty command"))?;
        let mut command = tokio::process::Command::new(program);
        command.args(rest);

        let status = if self.redirect_out_err {
            self.run_captured(command, &work_dir).await?
        } else {
            command.status().await?
        };

        let code = status.code().unwrap_or(-1);
        if code != 0 {
            anyhow::bail!("command `{}` failed, return code: {code}", self.cmd);
        }
        Ok(Arc::new(code) as JobOutput)
    }
}

impl SubprocessJob {
    async fn run_captured(
        &self,
        mut command: tokio::process::Command,
        work_dir: &std::path::Path,
    ) -> anyhow::Result<std::process::ExitStatus> {
        use tokio::io::AsyncWriteExt;

        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let mut child_stdout = child.stdout.take().expect("stdout was piped");
        let mut child_stderr = child.stderr.take().expect("stderr was piped");
        let mut stdout_file = tokio::fs::File::create(work_dir.join("stdout.txt")).await?;
        let mut stderr_file = tokio::fs::File::create(work_dir.join("stderr.txt")).await?;

        let (out_result, err_result, status) = tokio::join!(
            tokio::io::copy(&mut child_stdout, &mut stdout_file),
            tokio::io::copy(&mut child_stderr, &mut stderr_file),
            child.wait(),
        );
        out_result?;
        err_result?;
        stdout_file.flush().await?;
        stderr_file.flush().await?;
        Ok(status?)
    }
}

/// Construction parameters for [`subprocess_job`].
pub struct SubprocessSpec {
    pub cmd: String,
    pub name: Option<String>,
    pub record_cmd: bool,
    pub redirect_out_err: bool,
    pub backend_kind: BackendKind,
    pub condition: Option<Condition>,
    pub retries: u32,
    pub retry_time_delta: Duration,
}

impl Default for SubprocessSpec {
    fn default() -> Self {
        Self {
            cmd: String::new(),
            name: None,
            record_cmd: true,
            redirect_out_err: false,
            backend_kind: BackendKind::Process,
            condition: None,
            retries: 0,
            retry_time_delta: Duration::from_secs(0),
        }
    }
}

/// Build a job that runs `spec.cmd` through a shell-style argv split,
/// defaulting its name to the command's first word, as the original
/// does (`name = cmd.split()[0]`).
pub fn subprocess_job(spec: SubprocessSpec) -> std::sync::Arc<Job> {
    let name = spec
        .name
        .unwrap_or_else(|| spec.cmd.split_whitespace().next().unwrap_or("cmd").to_string());
    Job::new(JobSpec {
        name,
        body: JobBody::Function(Arc::new(SubprocessJob {
            cmd: spec.cmd,
            record_cmd: spec.record_cmd,
            redirect_out_err: spec.redirect_out_err,
        })),
        backend_kind: spec.backend_kind,
        condition: spec.condition,
        retries: spec.retries,
        retry_time_delta: spec.retry_time_delta,
        change_dir: true,
        redirect_out_err: false,
        ..JobSpec::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineSetting};
    use crate::job::Status;

    fn test_engine(name: &str) -> Engine {
        Engine::new(EngineSetting {
            cache_path: Some(std::env::temp_dir().join(format!("engine_core_test_subp_{name}"))),
            ..EngineSetting::default()
        })
    }

    #[tokio::test]
    async fn successful_command_completes_and_records_command_sh() {
        let engine = test_engine("ok");
        engine.start().await.unwrap();
        let job = subprocess_job(SubprocessSpec {
            cmd: "sh -c 'exit 0'".into(),
            ..SubprocessSpec::default()
        });
        engine.submit(job.clone()).await.unwrap();
        let cache_dir = job.cache_dir().unwrap();
        job.join(Some(Duration::from_secs(5))).await;
        assert_eq!(job.status(), Status::Done);
        let recorded = std::fs::read_to_string(cache_dir.join("command.sh")).unwrap();
        assert_eq!(recorded, "sh -c 'exit 0'\n");
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_fails_the_job() {
        let engine = test_engine("fail");
        engine.start().await.unwrap();
        let job = subprocess_job(SubprocessSpec {
            cmd: "sh -c 'exit 3'".into(),
            ..SubprocessSpec::default()
        });
        engine.submit(job.clone()).await.unwrap();
        job.join(Some(Duration::from_secs(5))).await;
        assert_eq!(job.status(), Status::Failed);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn redirect_out_err_captures_stdout() {
        let engine = test_engine("capture");
        engine.start().await.unwrap();
        let job = subprocess_job(SubprocessSpec {
            cmd: "sh -c 'echo hello-subprocess'".into(),
            redirect_out_err: true,
            ..SubprocessSpec::default()
        });
        engine.submit(job.clone()).await.unwrap();
        let cache_dir = job.cache_dir().unwrap();
        job.join(Some(Duration::from_secs(5))).await;
        assert_eq!(job.status(), Status::Done);
        let stdout = std::fs::read_to_string(cache_dir.join("stdout.txt")).unwrap();
        assert!(stdout.contains("hello-subprocess"));
        engine.stop().await.unwrap();
    }
}
