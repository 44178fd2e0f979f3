//! Job worker
//!
//! Drives one job from `Running` to a terminal status: stages
//! credentials, runs the subprocess, and writes the terminal record
//! with its audit fields and bookkeeping updates. The worker owns the
//! execution context, so dropping it at the end of the run removes the
//! job workspace.

use std::sync::Arc;

use chrono::Utc;
use drover_core::domain::activity::Activity;
use drover_core::domain::job::{Job, JobStatus};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::runner::ProcessRunner;
use crate::sink::OutputSink;
use crate::store::JobStore;
use crate::vault::CredentialVault;

/// Executes queued jobs one at a time on behalf of the scheduler.
pub struct Worker {
    store: Arc<dyn JobStore>,
    sink: Arc<OutputSink>,
    vault: Arc<CredentialVault>,
    config: Arc<Config>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        sink: Arc<OutputSink>,
        vault: Arc<CredentialVault>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            sink,
            vault,
            config,
        }
    }

    /// Runs one job to completion.
    ///
    /// Never returns an error: every failure mode ends in a terminal
    /// status on the job record. The context is consumed so the
    /// workspace is gone when this returns.
    pub async fn run(&self, mut ctx: ExecutionContext, cancel: oneshot::Receiver<()>) {
        self.mark_running(&mut ctx.job).await;

        let staged = {
            let credentials = ctx.credentials_to_stage();
            self.vault.stage(ctx.workspace_path(), &credentials).await
        };
        let mut staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                error!(job_id = %ctx.job.id, error = %e, "credential staging failed");
                ctx.job.job_explanation = format!("credential staging failed: {}", e);
                self.mark_terminal(&mut ctx, JobStatus::Error).await;
                return;
            }
        };

        let runner = ProcessRunner::new(self.config.clone(), self.sink.clone());
        let outcome = runner.run(&mut ctx, &staged, cancel).await;
        staged.cleanup().await;

        let status = match outcome {
            Ok(()) => JobStatus::Success,
            Err(EngineError::ProcessExit(code)) => {
                ctx.job.job_explanation = format!("process exited with status {}", code);
                JobStatus::Failed
            }
            Err(EngineError::Timeout(limit)) => {
                ctx.job.job_explanation =
                    format!("job killed after exceeding {}s timeout", limit.as_secs());
                JobStatus::Failed
            }
            Err(EngineError::Canceled) => {
                ctx.job.job_explanation = "canceled by request".to_string();
                JobStatus::Canceled
            }
            Err(e) => {
                ctx.job.job_explanation = e.to_string();
                JobStatus::Error
            }
        };

        self.mark_terminal(&mut ctx, status).await;
    }

    /// Fails a job without running it, used for queued jobs whose
    /// prerequisite did not succeed and for staging-free rejections.
    pub async fn fail_without_running(&self, mut ctx: ExecutionContext, explanation: &str) {
        ctx.job.job_explanation = explanation.to_string();
        if ctx.job.started.is_none() {
            ctx.job.started = Some(Utc::now());
        }
        self.mark_terminal(&mut ctx, JobStatus::Error).await;
    }

    /// Cancels a job that never left the queue.
    pub async fn cancel_without_running(&self, mut ctx: ExecutionContext) {
        ctx.job.job_explanation = "canceled before start".to_string();
        if ctx.job.started.is_none() {
            ctx.job.started = Some(Utc::now());
        }
        self.mark_terminal(&mut ctx, JobStatus::Canceled).await;
    }

    /// Marks a job that crashed its worker task. There is no context
    /// anymore, so this works from the stored record.
    pub async fn mark_panicked(&self, job_id: uuid::Uuid) {
        let mut job = match self.store.job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!(%job_id, "panicked job not found in store");
                return;
            }
            Err(e) => {
                error!(%job_id, error = %e, "could not load panicked job");
                return;
            }
        };

        job.job_explanation = "internal error: worker task failed".to_string();
        if job.advance(JobStatus::Error) {
            job.failed = true;
            job.finished = Some(Utc::now());
            if let Err(e) = self.store.update_job(&job).await {
                error!(%job_id, error = %e, "could not persist panic status");
            }
            self.sink.publish_status(&job);
        }
    }

    async fn mark_running(&self, job: &mut Job) {
        if !job.advance(JobStatus::Running) {
            warn!(job_id = %job.id, status = %job.status, "job refused running transition");
            return;
        }
        job.started = Some(Utc::now());
        if let Err(e) = self.store.update_job(job).await {
            warn!(job_id = %job.id, error = %e, "could not persist running status");
        }
        self.sink.publish_status(job);
        self.record_activity(job, format!("job {} started", job.name))
            .await;
        info!(job_id = %job.id, kind = ?job.kind, "job started");
    }

    async fn mark_terminal(&self, ctx: &mut ExecutionContext, status: JobStatus) {
        let job = &mut ctx.job;
        if !job.advance(status) {
            warn!(
                job_id = %job.id,
                current = %job.status,
                attempted = %status,
                "terminal transition refused"
            );
            return;
        }

        let now = Utc::now();
        job.failed = job.status.is_failed();
        job.finished = Some(now);
        if let Some(started) = job.started {
            job.elapsed = (now - started).num_milliseconds() as f64 / 1000.0;
        }

        if let Err(e) = self.store.update_job(job).await {
            error!(job_id = %job.id, error = %e, "could not persist terminal status");
        }
        self.sink.publish_status(job);
        self.update_bookkeeping(job).await;
        self.record_activity(
            job,
            format!("job {} finished with status {}", job.name, job.status),
        )
        .await;
        info!(
            job_id = %job.id,
            status = %job.status,
            elapsed = job.elapsed,
            "job finished"
        );
    }

    /// Mirrors the outcome onto the project and template the job ran for.
    async fn update_bookkeeping(&self, job: &Job) {
        if let Some(project_id) = job.project_id {
            match self.store.project(project_id).await {
                Ok(Some(mut project)) => {
                    project.last_job_run = job.finished;
                    project.last_job_failed = job.failed;
                    project.status = Some(job.status);
                    if let Err(e) = self.store.update_project(&project).await {
                        warn!(job_id = %job.id, error = %e, "project bookkeeping update failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "project lookup failed"),
            }
        }

        if let Some(template_id) = job.template_id {
            match self.store.template(template_id).await {
                Ok(Some(mut template)) => {
                    template.last_job_run = job.finished;
                    template.last_job_failed = job.failed;
                    template.status = Some(job.status);
                    if let Err(e) = self.store.update_template(&template).await {
                        warn!(job_id = %job.id, error = %e, "template bookkeeping update failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "template lookup failed"),
            }
        }
    }

    async fn record_activity(&self, job: &Job, description: String) {
        let activity = Activity::new(job.created_by.clone(), job.id, description);
        if let Err(e) = self.store.record_activity(&activity).await {
            warn!(job_id = %job.id, error = %e, "activity record failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBuilder;
    use crate::store::MemoryStore;
    use crate::vault::cipher::Cipher;
    use drover_core::domain::credential::{Credential, CredentialKind};
    use drover_core::domain::inventory::Inventory;
    use drover_core::domain::job::JobKind;

    fn harness(config: Config) -> (Arc<MemoryStore>, Worker, Arc<Config>) {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(config);
        let sink = OutputSink::new(store.clone());
        let cipher = Cipher::new(&config.secret_key).unwrap();
        let vault = Arc::new(CredentialVault::new(cipher));
        let worker = Worker::new(store.clone(), sink, vault, config.clone());
        (store, worker, config)
    }

    fn seeded_job(store: &MemoryStore) -> Job {
        let mut inventory = Inventory::new("test");
        inventory.hosts = vec!["127.0.0.1".to_string()];
        let mut job = Job::new(JobKind::AdHoc, "ping", "admin");
        job.module_name = Some("ping".to_string());
        job.inventory_id = Some(inventory.id);
        store.add_inventory(inventory);
        job
    }

    async fn context(
        store: &Arc<MemoryStore>,
        config: &Config,
        job: Job,
    ) -> ExecutionContext {
        store.insert_job(&job).await.unwrap();
        ContextBuilder::new(store.clone() as Arc<dyn JobStore>, config.tmp_root.clone())
            .build(job)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_run_ends_in_success() {
        let mut config = Config::default();
        config.ansible_bin = "/bin/echo".into();
        let (store, worker, config) = harness(config);
        let job = seeded_job(&store);
        let job_id = job.id;
        let ctx = context(&store, &config, job).await;
        let workspace = ctx.workspace_path().to_path_buf();

        let (_tx, rx) = oneshot::channel();
        worker.run(ctx, rx).await;

        let stored = store.job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Success);
        assert!(!stored.failed);
        assert!(stored.started.is_some());
        assert!(stored.finished.is_some());
        assert!(stored.elapsed >= 0.0);
        assert!(stored.result_stdout.contains("-m ping"));
        assert!(!workspace.exists(), "workspace must be wiped after the run");
    }

    #[tokio::test]
    async fn test_nonzero_exit_ends_in_failed() {
        let mut config = Config::default();
        config.ansible_bin = "/bin/false".into();
        let (store, worker, config) = harness(config);
        let job = seeded_job(&store);
        let job_id = job.id;
        let ctx = context(&store, &config, job).await;

        let (_tx, rx) = oneshot::channel();
        worker.run(ctx, rx).await;

        let stored = store.job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.failed);
        assert!(stored.job_explanation.contains("status 1"));
    }

    #[tokio::test]
    async fn test_staging_failure_ends_in_error_without_spawn() {
        let mut config = Config::default();
        config.ansible_bin = "/bin/echo".into();
        let (store, worker, config) = harness(config);

        let mut credential = Credential::new("bad", CredentialKind::Password);
        credential.password = Some("not-a-valid-token".to_string());
        let mut job = seeded_job(&store);
        job.machine_credential_id = Some(credential.id);
        store.add_credential(credential);
        let job_id = job.id;
        let ctx = context(&store, &config, job).await;
        let workspace = ctx.workspace_path().to_path_buf();

        let (_tx, rx) = oneshot::channel();
        worker.run(ctx, rx).await;

        let stored = store.job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert!(stored.failed);
        assert!(stored.job_explanation.contains("credential staging failed"));
        assert!(stored.result_stdout.is_empty());
        assert!(!workspace.exists(), "workspace must be wiped on staging failure");
    }

    #[tokio::test]
    async fn test_bookkeeping_mirrors_outcome_onto_template() {
        let mut config = Config::default();
        config.ansible_bin = "/bin/echo".into();
        let (store, worker, config) = harness(config);

        let template = drover_core::domain::template::JobTemplate::new("ping", "site.yml");
        let template_id = template.id;
        store.add_template(template);

        let mut job = seeded_job(&store);
        job.template_id = Some(template_id);
        let ctx = context(&store, &config, job).await;

        let (_tx, rx) = oneshot::channel();
        worker.run(ctx, rx).await;

        let stored = store.template(template_id).await.unwrap().unwrap();
        assert_eq!(stored.status, Some(JobStatus::Success));
        assert!(!stored.last_job_failed);
        assert!(stored.last_job_run.is_some());
    }

    #[tokio::test]
    async fn test_fail_without_running_sets_error_and_explanation() {
        let (store, worker, config) = harness(Config::default());
        let job = seeded_job(&store);
        let job_id = job.id;
        let ctx = context(&store, &config, job).await;

        worker
            .fail_without_running(ctx, "previous task failed")
            .await;

        let stored = store.job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert_eq!(stored.job_explanation, "previous task failed");
        assert!(stored.finished.is_some());
    }
}
