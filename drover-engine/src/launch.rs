//! Launch coordinator
//!
//! Turns a job template plus a launch request into queued jobs. A
//! launch resolves the template's defaults, applies prompt-on-launch
//! overrides, and when the project wants an SCM update before each run,
//! queues a system update job the playbook job depends on. Everything
//! that can fail is checked before any job record is inserted, so a
//! rejected launch leaves no trace.

use std::sync::Arc;

use drover_core::domain::activity::Activity;
use drover_core::domain::job::{Job, JobKind, LaunchType};
use drover_core::domain::project::Project;
use drover_core::domain::template::JobTemplate;
use drover_core::dto::launch::{AdHocRequest, LaunchRequest, RunType};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::context::ContextBuilder;
use crate::error::{EngineError, Result};
use crate::scheduler::Scheduler;
use crate::store::JobStore;

/// Front door for starting jobs.
pub struct LaunchCoordinator {
    store: Arc<dyn JobStore>,
    scheduler: Scheduler,
    builder: ContextBuilder,
}

impl LaunchCoordinator {
    pub fn new(store: Arc<dyn JobStore>, scheduler: Scheduler, config: Arc<Config>) -> Self {
        let builder = ContextBuilder::new(store.clone(), config.tmp_root.clone());
        Self {
            store,
            scheduler,
            builder,
        }
    }

    /// Launches a playbook job from a template.
    ///
    /// Returns the id of the playbook job. When the template's project
    /// has `scm_update_on_launch` set, a system update job is queued
    /// first and the playbook job only starts after it succeeds.
    pub async fn launch(
        &self,
        template_id: Uuid,
        request: LaunchRequest,
        user: &str,
    ) -> Result<Uuid> {
        let template = self
            .store
            .template(template_id)
            .await?
            .ok_or_else(|| EngineError::not_found("job template", template_id))?;

        let mut job = Job::new(JobKind::Playbook, template.name.clone(), user);
        job.launch_type = LaunchType::Manual;
        job.template_id = Some(template.id);
        job.project_id = template.project_id;
        job.inventory_id = template.inventory_id;
        job.machine_credential_id = template.machine_credential_id;
        job.network_credential_id = template.network_credential_id;
        job.cloud_credential_id = template.cloud_credential_id;
        job.playbook = Some(template.playbook.clone());
        job.extra_vars = template.extra_vars.clone();
        job.forks = template.forks;
        job.limit = template.limit.clone();
        job.verbosity = template.verbosity;
        job.job_tags = template.job_tags.clone();
        job.skip_tags = template.skip_tags.clone();
        job.start_at_task = template.start_at_task.clone();
        job.force_handlers = template.force_handlers;
        job.check_mode = template.check_mode;
        job.become_enabled = template.become_enabled;

        apply_prompts(&mut job, &template, &request)?;

        if job.inventory_id.is_none() {
            return Err(EngineError::MissingInventory);
        }

        let project = match job.project_id {
            Some(id) => Some(
                self.store
                    .project(id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("project", id))?,
            ),
            None => None,
        };

        let update_job = match &project {
            Some(project) if project.scm_update_on_launch => {
                Some(self.update_job_for(project, user))
            }
            _ => None,
        };
        if let Some(update) = &update_job {
            job.previous_job_id = Some(update.id);
        }

        // Both contexts are built before either record is inserted, so
        // a broken reference rejects the launch as a whole.
        let update_ctx = match update_job {
            Some(update) => Some(self.builder.build(update).await?),
            None => None,
        };
        let ctx = self.builder.build(job).await?;
        let job_id = ctx.job.id;

        if let Some(update_ctx) = &update_ctx {
            self.store.insert_job(&update_ctx.job).await?;
        }
        self.store.insert_job(&ctx.job).await?;
        self.store
            .record_activity(&Activity::new(user, job_id, "job queued"))
            .await?;

        let depends_on = update_ctx.as_ref().map(|u| u.job.id);
        if let Some(update_ctx) = update_ctx {
            info!(
                job_id = %job_id,
                update_job_id = %update_ctx.job.id,
                "queueing project update before job"
            );
            self.scheduler.submit(update_ctx, None)?;
        }
        self.scheduler.submit(ctx, depends_on)?;

        info!(%job_id, %template_id, user, "job launched");
        Ok(job_id)
    }

    /// Launches a one-off module invocation.
    pub async fn launch_ad_hoc(&self, request: AdHocRequest, user: &str) -> Result<Uuid> {
        if request.module_name.is_empty() {
            return Err(EngineError::MissingRequiredField("module"));
        }

        let mut job = Job::new(
            JobKind::AdHoc,
            format!("adhoc: {}", request.module_name),
            user,
        );
        job.launch_type = LaunchType::Manual;
        job.inventory_id = Some(request.inventory_id);
        job.machine_credential_id = Some(request.credential_id);
        job.module_name = Some(request.module_name);
        job.module_args = request.module_args;
        job.pattern = request.pattern;
        job.connection = request.connection;
        job.forks = request.forks;
        job.verbosity = request.verbosity;
        job.become_enabled = request.become_enabled;
        if let Some(extra_vars) = request.extra_vars {
            job.extra_vars = extra_vars;
        }

        let ctx = self.builder.build(job).await?;
        let job_id = ctx.job.id;

        self.store.insert_job(&ctx.job).await?;
        self.store
            .record_activity(&Activity::new(user, job_id, "ad-hoc job queued"))
            .await?;
        self.scheduler.submit(ctx, None)?;

        info!(%job_id, user, "ad-hoc job launched");
        Ok(job_id)
    }

    /// Launches the SCM update for a project on its own, outside any
    /// template launch.
    pub async fn launch_project_update(&self, project_id: Uuid, user: &str) -> Result<Uuid> {
        let project = self
            .store
            .project(project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", project_id))?;

        let job = self.update_job_for(&project, user);
        let ctx = self.builder.build(job).await?;
        let job_id = ctx.job.id;

        self.store.insert_job(&ctx.job).await?;
        self.store
            .record_activity(&Activity::new(user, job_id, "project update queued"))
            .await?;
        self.scheduler.submit(ctx, None)?;

        info!(%job_id, %project_id, user, "project update launched");
        Ok(job_id)
    }

    fn update_job_for(&self, project: &Project, user: &str) -> Job {
        let mut job = Job::new(
            JobKind::ProjectUpdate,
            format!("update: {}", project.name),
            user,
        );
        job.launch_type = LaunchType::System;
        job.project_id = Some(project.id);
        job.machine_credential_id = None;
        job
    }
}

/// Applies prompt-on-launch overrides.
///
/// A prompted field must be present in the request; a non-prompted
/// field must not be overridden.
fn apply_prompts(job: &mut Job, template: &JobTemplate, request: &LaunchRequest) -> Result<()> {
    if template.prompt_variables {
        match &request.extra_vars {
            Some(vars) => job.extra_vars = vars.clone(),
            None => {
                return Err(EngineError::Validation(
                    "template prompts for extra variables but none were supplied".to_string(),
                ));
            }
        }
    } else if request.extra_vars.is_some() {
        return Err(EngineError::Validation(
            "extra variables are not prompted on launch for this template".to_string(),
        ));
    }

    if template.prompt_limit {
        match &request.limit {
            Some(limit) => job.limit = Some(limit.clone()),
            None => {
                return Err(EngineError::Validation(
                    "template prompts for a limit but none was supplied".to_string(),
                ));
            }
        }
    } else if request.limit.is_some() {
        return Err(EngineError::Validation(
            "limit is not prompted on launch for this template".to_string(),
        ));
    }

    if template.prompt_tags {
        match &request.job_tags {
            Some(tags) => job.job_tags = Some(tags.clone()),
            None => {
                return Err(EngineError::Validation(
                    "template prompts for job tags but none were supplied".to_string(),
                ));
            }
        }
    } else if request.job_tags.is_some() {
        return Err(EngineError::Validation(
            "job tags are not prompted on launch for this template".to_string(),
        ));
    }

    if template.prompt_skip_tags {
        match &request.skip_tags {
            Some(tags) => job.skip_tags = Some(tags.clone()),
            None => {
                return Err(EngineError::Validation(
                    "template prompts for skip tags but none were supplied".to_string(),
                ));
            }
        }
    } else if request.skip_tags.is_some() {
        return Err(EngineError::Validation(
            "skip tags are not prompted on launch for this template".to_string(),
        ));
    }

    if template.prompt_job_type {
        match request.run_type {
            Some(run_type) => job.check_mode = run_type == RunType::Check,
            None => {
                return Err(EngineError::Validation(
                    "template prompts for a job type but none was supplied".to_string(),
                ));
            }
        }
    } else if request.run_type.is_some() {
        return Err(EngineError::Validation(
            "job type is not prompted on launch for this template".to_string(),
        ));
    }

    if template.prompt_inventory {
        match request.inventory_id {
            Some(id) => job.inventory_id = Some(id),
            None => {
                return Err(EngineError::Validation(
                    "template prompts for an inventory but none was supplied".to_string(),
                ));
            }
        }
    } else if request.inventory_id.is_some() {
        return Err(EngineError::Validation(
            "inventory is not prompted on launch for this template".to_string(),
        ));
    }

    if template.prompt_credential {
        match request.machine_credential_id {
            Some(id) => job.machine_credential_id = Some(id),
            None => {
                return Err(EngineError::Validation(
                    "template prompts for a credential but none was supplied".to_string(),
                ));
            }
        }
    } else if request.machine_credential_id.is_some() {
        return Err(EngineError::Validation(
            "credential is not prompted on launch for this template".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::OutputSink;
    use crate::store::MemoryStore;
    use crate::vault::cipher::Cipher;
    use crate::vault::CredentialVault;
    use drover_core::domain::inventory::Inventory;
    use drover_core::domain::job::JobStatus;
    use serde_json::{Map, Value};
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        coordinator: LaunchCoordinator,
    }

    fn fixture() -> Fixture {
        let mut config = Config::default();
        config.ansible_bin = "/bin/echo".into();
        config.playbook_bin = "/bin/echo".into();
        config.projects_root = std::env::temp_dir().join("drover-test-projects");
        config.tick_interval = Duration::from_millis(20);
        let config = Arc::new(config);

        let store = Arc::new(MemoryStore::new());
        let sink = OutputSink::new(store.clone());
        let cipher = Cipher::new(&config.secret_key).unwrap();
        let vault = Arc::new(CredentialVault::new(cipher));
        let scheduler = Scheduler::start(store.clone(), sink, vault, config.clone());
        let coordinator = LaunchCoordinator::new(store.clone(), scheduler, config);
        Fixture { store, coordinator }
    }

    fn seed_template(store: &MemoryStore) -> JobTemplate {
        let mut inventory = Inventory::new("test");
        inventory.hosts = vec!["127.0.0.1".to_string()];
        let mut template = JobTemplate::new("deploy", "site.yml");
        template.inventory_id = Some(inventory.id);
        store.add_inventory(inventory);
        store.add_template(template.clone());
        template
    }

    async fn wait_terminal(store: &MemoryStore, job_id: Uuid) -> Job {
        for _ in 0..200 {
            let job = store.job(job_id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached a terminal status", job_id);
    }

    #[tokio::test]
    async fn test_launch_unknown_template_is_not_found() {
        let fixture = fixture();
        let err = fixture
            .coordinator
            .launch(Uuid::new_v4(), LaunchRequest::default(), "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_launch_copies_template_defaults() {
        let fixture = fixture();
        let template = seed_template(&fixture.store);

        let job_id = fixture
            .coordinator
            .launch(template.id, LaunchRequest::default(), "admin")
            .await
            .unwrap();

        let job = fixture.store.job(job_id).await.unwrap().unwrap();
        assert_eq!(job.playbook.as_deref(), Some("site.yml"));
        assert_eq!(job.template_id, Some(template.id));
        assert_eq!(job.launch_type, LaunchType::Manual);
        wait_terminal(&fixture.store, job_id).await;
    }

    #[tokio::test]
    async fn test_prompted_field_is_required() {
        let fixture = fixture();
        let mut inventory = Inventory::new("test");
        inventory.hosts = vec!["127.0.0.1".to_string()];
        let mut template = JobTemplate::new("deploy", "site.yml");
        template.inventory_id = Some(inventory.id);
        template.prompt_limit = true;
        fixture.store.add_inventory(inventory);
        fixture.store.add_template(template.clone());

        let err = fixture
            .coordinator
            .launch(template.id, LaunchRequest::default(), "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let request = LaunchRequest {
            limit: Some("web".to_string()),
            ..LaunchRequest::default()
        };
        let job_id = fixture
            .coordinator
            .launch(template.id, request, "admin")
            .await
            .unwrap();
        let job = fixture.store.job(job_id).await.unwrap().unwrap();
        assert_eq!(job.limit.as_deref(), Some("web"));
        wait_terminal(&fixture.store, job_id).await;
    }

    #[tokio::test]
    async fn test_unprompted_override_is_rejected() {
        let fixture = fixture();
        let template = seed_template(&fixture.store);

        let mut extra = Map::new();
        extra.insert("rogue".to_string(), Value::Bool(true));
        let request = LaunchRequest {
            extra_vars: Some(extra),
            ..LaunchRequest::default()
        };
        let err = fixture
            .coordinator
            .launch(template.id, request, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Rejected launches leave no job behind.
        assert!(fixture.store.activities().is_empty());
    }

    #[tokio::test]
    async fn test_update_on_launch_queues_prerequisite_update() {
        let fixture = fixture();
        let mut inventory = Inventory::new("test");
        inventory.hosts = vec!["127.0.0.1".to_string()];
        let mut project = Project::new("app", "https://example.invalid/app.git");
        project.scm_update_on_launch = true;
        let mut template = JobTemplate::new("deploy", "site.yml");
        template.inventory_id = Some(inventory.id);
        template.project_id = Some(project.id);
        fixture.store.add_inventory(inventory);
        fixture.store.add_project(project);
        fixture.store.add_template(template.clone());

        let job_id = fixture
            .coordinator
            .launch(template.id, LaunchRequest::default(), "admin")
            .await
            .unwrap();

        let job = fixture.store.job(job_id).await.unwrap().unwrap();
        let update_id = job.previous_job_id.expect("update job linked");
        let update = fixture.store.job(update_id).await.unwrap().unwrap();
        assert_eq!(update.kind, JobKind::ProjectUpdate);
        assert_eq!(update.launch_type, LaunchType::System);

        let update = wait_terminal(&fixture.store, update_id).await;
        assert_eq!(update.status, JobStatus::Success);
        let job = wait_terminal(&fixture.store, job_id).await;
        assert_eq!(job.status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_ad_hoc_launch_runs_module() {
        let fixture = fixture();
        let mut inventory = Inventory::new("test");
        inventory.hosts = vec!["127.0.0.1".to_string()];
        let inventory_id = inventory.id;
        let credential = drover_core::domain::credential::Credential::new(
            "ssh",
            drover_core::domain::credential::CredentialKind::Ssh,
        );
        let credential_id = credential.id;
        fixture.store.add_inventory(inventory);
        fixture.store.add_credential(credential);

        let request = AdHocRequest {
            module_name: "ping".to_string(),
            module_args: None,
            pattern: None,
            inventory_id,
            credential_id,
            connection: None,
            forks: 0,
            verbosity: 0,
            extra_vars: None,
            become_enabled: false,
        };
        let job_id = fixture
            .coordinator
            .launch_ad_hoc(request, "admin")
            .await
            .unwrap();

        let job = wait_terminal(&fixture.store, job_id).await;
        assert_eq!(job.status, JobStatus::Success);
        assert!(job.result_stdout.contains("-m ping"));
    }
}
