//! Project domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::JobStatus;

/// A source-controlled collection of playbooks.
///
/// The engine keeps `last_job_run`/`last_job_failed`/`status` in sync
/// with the most recent job that touched the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub organization_id: Option<Uuid>,

    pub scm_url: String,
    pub scm_branch: Option<String>,
    pub scm_credential_id: Option<Uuid>,
    /// Run an SCM update job before every launch from this project.
    pub scm_update_on_launch: bool,

    pub last_job_run: Option<chrono::DateTime<chrono::Utc>>,
    pub last_job_failed: bool,
    pub status: Option<JobStatus>,
}

impl Project {
    pub fn new(name: impl Into<String>, scm_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            organization_id: None,
            scm_url: scm_url.into(),
            scm_branch: None,
            scm_credential_id: None,
            scm_update_on_launch: false,
            last_job_run: None,
            last_job_failed: false,
            status: None,
        }
    }
}
