//! Job template domain types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::job::JobStatus;

/// Persisted launch defaults plus the prompt-on-launch policy.
///
/// Every `prompt_*` flag marks a field that must be supplied in the
/// launch request instead of taken from the template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: String,

    pub project_id: Option<Uuid>,
    pub inventory_id: Option<Uuid>,
    pub machine_credential_id: Option<Uuid>,
    pub network_credential_id: Option<Uuid>,
    pub cloud_credential_id: Option<Uuid>,

    pub playbook: String,
    pub extra_vars: Map<String, Value>,
    pub forks: u32,
    pub limit: Option<String>,
    pub verbosity: u8,
    pub job_tags: Option<String>,
    pub skip_tags: Option<String>,
    pub start_at_task: Option<String>,
    pub force_handlers: bool,
    pub check_mode: bool,
    pub become_enabled: bool,

    pub prompt_variables: bool,
    pub prompt_limit: bool,
    pub prompt_tags: bool,
    pub prompt_skip_tags: bool,
    pub prompt_job_type: bool,
    pub prompt_inventory: bool,
    pub prompt_credential: bool,

    pub last_job_run: Option<chrono::DateTime<chrono::Utc>>,
    pub last_job_failed: bool,
    pub status: Option<JobStatus>,
}

impl JobTemplate {
    pub fn new(name: impl Into<String>, playbook: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            project_id: None,
            inventory_id: None,
            machine_credential_id: None,
            network_credential_id: None,
            cloud_credential_id: None,
            playbook: playbook.into(),
            extra_vars: Map::new(),
            forks: 0,
            limit: None,
            verbosity: 0,
            job_tags: None,
            skip_tags: None,
            start_at_task: None,
            force_handlers: false,
            check_mode: false,
            become_enabled: false,
            prompt_variables: false,
            prompt_limit: false,
            prompt_tags: false,
            prompt_skip_tags: false,
            prompt_job_type: false,
            prompt_inventory: false,
            prompt_credential: false,
            last_job_run: None,
            last_job_failed: false,
            status: None,
        }
    }
}
