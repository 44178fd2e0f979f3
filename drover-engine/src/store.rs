//! Job record store boundary
//!
//! The engine reads resolved entities and issues point updates keyed by
//! job id; the surrounding CRUD layer owns the actual schema. The
//! in-memory implementation backs embedded use and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use drover_core::domain::activity::Activity;
use drover_core::domain::credential::Credential;
use drover_core::domain::inventory::Inventory;
use drover_core::domain::job::Job;
use drover_core::domain::output::OutputRecord;
use drover_core::domain::project::Project;
use drover_core::domain::template::JobTemplate;
use uuid::Uuid;

use crate::error::Result;

/// Document-store collaborator holding jobs, entities, and output.
///
/// All writes are point updates or inserts; the engine never scans.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn job(&self, id: Uuid) -> Result<Option<Job>>;

    /// Inserts a freshly launched job record.
    async fn insert_job(&self, job: &Job) -> Result<()>;

    /// Point update of a job's status/timing/result fields.
    async fn update_job(&self, job: &Job) -> Result<()>;

    async fn credential(&self, id: Uuid) -> Result<Option<Credential>>;
    async fn inventory(&self, id: Uuid) -> Result<Option<Inventory>>;
    async fn project(&self, id: Uuid) -> Result<Option<Project>>;
    async fn template(&self, id: Uuid) -> Result<Option<JobTemplate>>;

    /// Mirrors last-run bookkeeping onto the project record.
    async fn update_project(&self, project: &Project) -> Result<()>;

    /// Mirrors last-run bookkeeping onto the template record.
    async fn update_template(&self, template: &JobTemplate) -> Result<()>;

    /// Appends one captured output line.
    async fn append_output(&self, record: &OutputRecord) -> Result<()>;

    /// All output lines for a job, in insertion order.
    async fn outputs(&self, job_id: Uuid) -> Result<Vec<OutputRecord>>;

    /// Appends one audit activity record.
    async fn record_activity(&self, activity: &Activity) -> Result<()>;
}

/// In-memory implementation of [`JobStore`]
///
/// Backs tests and embedded single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    credentials: Mutex<HashMap<Uuid, Credential>>,
    inventories: Mutex<HashMap<Uuid, Inventory>>,
    projects: Mutex<HashMap<Uuid, Project>>,
    templates: Mutex<HashMap<Uuid, JobTemplate>>,
    outputs: Mutex<Vec<OutputRecord>>,
    activities: Mutex<Vec<Activity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Seeding helpers; entity CRUD is owned by the layer above the
    // engine, so these are not part of the JobStore contract.

    pub fn add_credential(&self, credential: Credential) {
        self.credentials
            .lock()
            .unwrap()
            .insert(credential.id, credential);
    }

    pub fn add_inventory(&self, inventory: Inventory) {
        self.inventories
            .lock()
            .unwrap()
            .insert(inventory.id, inventory);
    }

    pub fn add_project(&self, project: Project) {
        self.projects.lock().unwrap().insert(project.id, project);
    }

    pub fn add_template(&self, template: JobTemplate) {
        self.templates.lock().unwrap().insert(template.id, template);
    }

    pub fn activities(&self) -> Vec<Activity> {
        self.activities.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn insert_job(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn credential(&self, id: Uuid) -> Result<Option<Credential>> {
        Ok(self.credentials.lock().unwrap().get(&id).cloned())
    }

    async fn inventory(&self, id: Uuid) -> Result<Option<Inventory>> {
        Ok(self.inventories.lock().unwrap().get(&id).cloned())
    }

    async fn project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.projects.lock().unwrap().get(&id).cloned())
    }

    async fn template(&self, id: Uuid) -> Result<Option<JobTemplate>> {
        Ok(self.templates.lock().unwrap().get(&id).cloned())
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        self.projects
            .lock()
            .unwrap()
            .insert(project.id, project.clone());
        Ok(())
    }

    async fn update_template(&self, template: &JobTemplate) -> Result<()> {
        self.templates
            .lock()
            .unwrap()
            .insert(template.id, template.clone());
        Ok(())
    }

    async fn append_output(&self, record: &OutputRecord) -> Result<()> {
        self.outputs.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn outputs(&self, job_id: Uuid) -> Result<Vec<OutputRecord>> {
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn record_activity(&self, activity: &Activity) -> Result<()> {
        self.activities.lock().unwrap().push(activity.clone());
        Ok(())
    }
}
