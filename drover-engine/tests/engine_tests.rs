//! End-to-end engine scenarios through the public facade.
//!
//! The ansible binaries are substituted with stock shell utilities so
//! the suite runs anywhere.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use drover_core::domain::inventory::Inventory;
use drover_core::domain::job::{Job, JobStatus};
use drover_core::domain::project::Project;
use drover_core::domain::template::JobTemplate;
use drover_core::dto::launch::LaunchRequest;
use drover_engine::{Config, Engine, JobEvent, JobStore, MemoryStore};
use uuid::Uuid;

fn test_config() -> Config {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drover_engine=debug".into()),
        )
        .with_test_writer()
        .try_init();

    let mut config = Config::default();
    config.ansible_bin = "/bin/echo".into();
    config.playbook_bin = "/bin/echo".into();
    config.tmp_root = std::env::temp_dir().join(format!("drover-it-{}", Uuid::new_v4()));
    config.projects_root = config.tmp_root.join("projects");
    config.tick_interval = Duration::from_millis(20);
    config
}

fn seed_template(store: &MemoryStore) -> JobTemplate {
    let mut inventory = Inventory::new("integration");
    inventory.hosts = vec!["127.0.0.1".to_string()];
    let mut template = JobTemplate::new("deploy", "site.yml");
    template.inventory_id = Some(inventory.id);
    store.add_inventory(inventory);
    store.add_template(template.clone());
    template
}

async fn wait_terminal(store: &MemoryStore, job_id: Uuid) -> Job {
    for _ in 0..250 {
        let job = store.job(job_id).await.unwrap().unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} never reached a terminal status", job_id);
}

#[tokio::test]
async fn test_template_launch_runs_to_success() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(test_config(), store.clone())?;
    let template = seed_template(&store);

    let job_id = engine
        .launcher()
        .launch(template.id, LaunchRequest::default(), "admin")
        .await?;

    let job = wait_terminal(&store, job_id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert!(!job.failed);
    assert!(job.result_stdout.contains("site.yml"));
    assert!(!job.job_args.is_empty());
    assert!(job.job_env.iter().any(|e| e == "PYTHONUNBUFFERED=1"));
    Ok(())
}

#[tokio::test]
async fn test_live_events_carry_output_and_status() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(test_config(), store.clone())?;
    let template = seed_template(&store);
    let mut events = engine.events();

    let job_id = engine
        .launcher()
        .launch(template.id, LaunchRequest::default(), "admin")
        .await?;
    wait_terminal(&store, job_id).await;

    let mut saw_output = false;
    let mut saw_terminal_status = false;
    while let Ok(event) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        match event? {
            JobEvent::Output(record) if record.job_id == job_id => saw_output = true,
            JobEvent::Status { job_id: id, status, .. }
                if id == job_id && status.is_terminal() =>
            {
                saw_terminal_status = true;
            }
            _ => {}
        }
    }
    assert!(saw_output, "expected at least one output line event");
    assert!(saw_terminal_status, "expected a terminal status event");
    Ok(())
}

#[tokio::test]
async fn test_update_on_launch_runs_update_before_job() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(test_config(), store.clone())?;

    let mut inventory = Inventory::new("integration");
    inventory.hosts = vec!["127.0.0.1".to_string()];
    let mut project = Project::new("app", "https://example.invalid/app.git");
    project.scm_update_on_launch = true;
    let project_id = project.id;
    let mut template = JobTemplate::new("deploy", "site.yml");
    template.inventory_id = Some(inventory.id);
    template.project_id = Some(project_id);
    store.add_inventory(inventory);
    store.add_project(project);
    store.add_template(template.clone());

    let job_id = engine
        .launcher()
        .launch(template.id, LaunchRequest::default(), "admin")
        .await?;

    let job = wait_terminal(&store, job_id).await;
    let update_id = job.previous_job_id.expect("update job linked");
    let update = wait_terminal(&store, update_id).await;

    assert_eq!(update.status, JobStatus::Success);
    assert_eq!(job.status, JobStatus::Success);
    assert!(job.started.unwrap() >= update.finished.unwrap());

    // The update outcome is mirrored onto the project record.
    let project = store.project(project_id).await?.unwrap();
    assert_eq!(project.status, Some(JobStatus::Success));
    Ok(())
}

#[tokio::test]
async fn test_workspaces_are_gone_after_terminal_states() -> Result<()> {
    let config = test_config();
    let tmp_root = config.tmp_root.clone();
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(config, store.clone())?;
    let template = seed_template(&store);

    let job_id = engine
        .launcher()
        .launch(template.id, LaunchRequest::default(), "admin")
        .await?;
    wait_terminal(&store, job_id).await;

    let leftovers: Vec<_> = std::fs::read_dir(&tmp_root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("job-"))
        .collect();
    assert!(leftovers.is_empty(), "job workspaces left behind: {:?}", leftovers);
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = test_config();
    config.secret_key = vec![0; 7];
    let err = Engine::new(config, Arc::new(MemoryStore::new())).unwrap_err();
    assert!(err.to_string().contains("secret_key"));
}
