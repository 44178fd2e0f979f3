//! Subprocess runner
//!
//! Spawns the external binary for a job with a fully replaced
//! environment and a deterministic argument vector, streams both output
//! pipes into the sink, and waits for exit, cancellation, or timeout.

pub mod kind;

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use drover_core::domain::job::Job;
use drover_core::domain::output::OutputStream;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::sink::OutputSink;
use crate::vault::StagedCredentials;

pub use self::kind::{ArgSpec, ProcessKind};

use self::kind::for_job_kind;

/// Fixed search path the subprocess sees instead of the engine's own.
const SUBPROCESS_PATH: &str = "/bin:/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Runs job subprocesses.
pub struct ProcessRunner {
    config: Arc<Config>,
    sink: Arc<OutputSink>,
}

impl ProcessRunner {
    pub fn new(config: Arc<Config>, sink: Arc<OutputSink>) -> Self {
        Self { config, sink }
    }

    /// Validates, spawns, and waits on the subprocess for a job.
    ///
    /// Mutates the context's job in place: audit fields (`job_args`,
    /// `job_env`, `job_cwd`) are set before the spawn so they are
    /// recorded even when the process fails, and `result_stdout` is set
    /// from the collected stream once the process ends.
    ///
    /// Returns `Ok(())` only on exit status zero. Cancellation through
    /// `cancel` kills the process and returns [`EngineError::Canceled`];
    /// exceeding the configured timeout kills it and returns
    /// [`EngineError::Timeout`].
    pub async fn run(
        &self,
        ctx: &mut ExecutionContext,
        staged: &StagedCredentials,
        cancel: oneshot::Receiver<()>,
    ) -> Result<()> {
        let strategy = for_job_kind(ctx.job.kind);
        strategy.validate(ctx)?;

        let args = strategy.build_args(&self.config, ctx, staged)?;
        let cwd = strategy.working_dir(&self.config, ctx);
        let env = self.build_env(&ctx.job, ctx.workspace_path(), &cwd, staged);
        let program = strategy.program(&self.config).to_path_buf();

        ctx.job.job_args = args.audited().to_vec();
        ctx.job.job_env = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        ctx.job.job_cwd = cwd.to_string_lossy().into_owned();

        debug!(
            job_id = %ctx.job.id,
            program = %program.display(),
            args = ?args.audited(),
            "spawning job process"
        );

        // The project checkout may not exist before its first update.
        tokio::fs::create_dir_all(&cwd).await.map_err(|e| {
            EngineError::Internal(format!(
                "could not create working directory {}: {}",
                cwd.display(),
                e
            ))
        })?;

        let mut child = Command::new(&program)
            .args(args.full())
            .current_dir(&cwd)
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: program.to_string_lossy().into_owned(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            EngineError::Internal("child process has no stdout pipe".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            EngineError::Internal("child process has no stderr pipe".to_string())
        })?;

        let stdout_task = self.sink.capture(ctx.job.id, OutputStream::Stdout, stdout);
        let stderr_task = self.sink.capture(ctx.job.id, OutputStream::Stderr, stderr);

        let timeout = tokio::time::sleep(self.config.job_timeout);
        tokio::pin!(timeout);

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| {
                EngineError::Internal(format!("wait on child failed: {}", e))
            })?,
            _ = cancel => {
                info!(job_id = %ctx.job.id, "cancel requested, killing job process");
                if let Err(e) = child.kill().await {
                    warn!(job_id = %ctx.job.id, error = %e, "kill after cancel failed");
                }
                collect_result(&mut ctx.job, stdout_task, stderr_task).await;
                return Err(EngineError::Canceled);
            }
            _ = &mut timeout => {
                warn!(
                    job_id = %ctx.job.id,
                    timeout = ?self.config.job_timeout,
                    "job exceeded timeout, killing process"
                );
                if let Err(e) = child.kill().await {
                    warn!(job_id = %ctx.job.id, error = %e, "kill after timeout failed");
                }
                collect_result(&mut ctx.job, stdout_task, stderr_task).await;
                return Err(EngineError::Timeout(self.config.job_timeout));
            }
        };

        collect_result(&mut ctx.job, stdout_task, stderr_task).await;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::ProcessExit(status.code().unwrap_or(-1)))
        }
    }

    /// Environment the subprocess sees. Fully replaced, never inherited.
    fn build_env(
        &self,
        job: &Job,
        workspace: &Path,
        cwd: &Path,
        staged: &StagedCredentials,
    ) -> Vec<(String, String)> {
        let mut env = vec![
            ("TERM".to_string(), "xterm".to_string()),
            ("PATH".to_string(), SUBPROCESS_PATH.to_string()),
            ("HOME".to_string(), workspace.to_string_lossy().into_owned()),
            ("PWD".to_string(), cwd.to_string_lossy().into_owned()),
            ("LANG".to_string(), "en_US.UTF-8".to_string()),
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ("ANSIBLE_HOST_KEY_CHECKING".to_string(), "False".to_string()),
            ("ANSIBLE_FORCE_COLOR".to_string(), "True".to_string()),
            (
                "ANSIBLE_PARAMIKO_RECORD_HOST_KEYS".to_string(),
                "False".to_string(),
            ),
            ("JOB_ID".to_string(), job.id.to_string()),
        ];

        if let Some(agent) = &staged.agent {
            env.push((
                "SSH_AUTH_SOCK".to_string(),
                agent.socket().to_string_lossy().into_owned(),
            ));
            env.push(("SSH_AGENT_PID".to_string(), agent.pid().to_string()));
        }

        env
    }
}

/// Joins both stream readers and stores their lines as the result
/// summary, stdout first. Per-stream records keep the exact split; the
/// summary mirrors what a terminal run of the same command would show.
async fn collect_result(
    job: &mut Job,
    stdout_task: tokio::task::JoinHandle<Vec<String>>,
    stderr_task: tokio::task::JoinHandle<Vec<String>>,
) {
    let mut lines = Vec::new();
    for task in [stdout_task, stderr_task] {
        match task.await {
            Ok(mut collected) => lines.append(&mut collected),
            Err(e) => warn!(job_id = %job.id, error = %e, "stream reader task failed"),
        }
    }
    job.result_stdout = lines.join("\n");
}
