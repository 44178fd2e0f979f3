//! Job domain types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One execution request tracked through its status state machine.
///
/// A job is either a playbook run instantiated from a [`crate::domain::template::JobTemplate`],
/// an ad-hoc module invocation, or an internal project SCM update. The
/// argument and environment vectors actually used by the subprocess are
/// retained on the record for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub kind: JobKind,
    pub launch_type: LaunchType,
    pub status: JobStatus,
    /// Set once the job reaches `Failed` or `Error`.
    pub failed: bool,

    pub template_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub inventory_id: Option<Uuid>,
    pub machine_credential_id: Option<Uuid>,
    pub network_credential_id: Option<Uuid>,
    pub cloud_credential_id: Option<Uuid>,
    /// Prerequisite job (project update) that must complete first.
    pub previous_job_id: Option<Uuid>,

    pub playbook: Option<String>,
    pub module_name: Option<String>,
    pub module_args: Option<String>,
    /// Host pattern for ad-hoc runs; defaults to `all`.
    pub pattern: Option<String>,
    pub connection: Option<String>,
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

    pub created: chrono::DateTime<chrono::Utc>,
    pub started: Option<chrono::DateTime<chrono::Utc>>,
    pub finished: Option<chrono::DateTime<chrono::Utc>>,
    /// Seconds between start and finish, computed at terminal update.
    pub elapsed: f64,

    pub result_stdout: String,
    pub job_explanation: String,
    /// Argument vector actually passed to the subprocess, secrets excluded.
    pub job_args: Vec<String>,
    /// Environment actually given to the subprocess (`KEY=value` pairs).
    pub job_env: Vec<String>,
    pub job_cwd: String,

    pub created_by: String,
}

impl Job {
    /// Creates an empty job shell of the given kind.
    ///
    /// Callers fill in the execution parameters before persisting it.
    pub fn new(kind: JobKind, name: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            launch_type: LaunchType::Manual,
            status: JobStatus::New,
            failed: false,
            template_id: None,
            project_id: None,
            inventory_id: None,
            machine_credential_id: None,
            network_credential_id: None,
            cloud_credential_id: None,
            previous_job_id: None,
            playbook: None,
            module_name: None,
            module_args: None,
            pattern: None,
            connection: None,
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
            created: chrono::Utc::now(),
            started: None,
            finished: None,
            elapsed: 0.0,
            result_stdout: String::new(),
            job_explanation: String::new(),
            job_args: Vec::new(),
            job_env: Vec::new(),
            job_cwd: String::new(),
            created_by: created_by.into(),
        }
    }

    /// Moves the job to a new status.
    ///
    /// Returns `false` without changing anything when the transition is
    /// not allowed: terminal states are never re-entered or overwritten,
    /// no job ever returns to `New`, and a job that never ran cannot
    /// claim a run outcome (`New` only leads to `Running`, `Canceled`,
    /// or `Error`).
    pub fn advance(&mut self, to: JobStatus) -> bool {
        if self.status.is_terminal() || to == JobStatus::New {
            return false;
        }
        if self.status == JobStatus::New
            && matches!(to, JobStatus::Success | JobStatus::Failed)
        {
            return false;
        }
        self.status = to;
        true
    }
}

/// What the job actually executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// `ansible-playbook` run instantiated from a job template.
    Playbook,
    /// Single-module `ansible` invocation.
    AdHoc,
    /// Internal SCM update for a project checkout.
    ProjectUpdate,
}

/// How the job came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchType {
    Manual,
    /// Launched by the engine itself (project updates).
    System,
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    New,
    Running,
    Success,
    Failed,
    Error,
    Canceled,
}

impl JobStatus {
    /// Terminal statuses persist; nothing transitions out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Error | JobStatus::Canceled
        )
    }

    /// Whether this status counts as a failure for bookkeeping.
    pub fn is_failed(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::New => "new",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}
