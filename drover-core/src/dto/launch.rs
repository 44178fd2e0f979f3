//! Launch request DTOs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Prompt-on-launch overrides for a template launch.
///
/// Every field is optional; a field is only consulted (and then
/// required) when the template marks it prompt-on-launch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub extra_vars: Option<Map<String, Value>>,
    pub limit: Option<String>,
    pub job_tags: Option<String>,
    pub skip_tags: Option<String>,
    pub run_type: Option<RunType>,
    pub inventory_id: Option<Uuid>,
    pub machine_credential_id: Option<Uuid>,
}

/// Whether a playbook job applies changes or only reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunType {
    Run,
    Check,
}

/// Parameters for a one-off module invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdHocRequest {
    pub module_name: String,
    pub module_args: Option<String>,
    /// Host pattern; defaults to `all`.
    pub pattern: Option<String>,
    pub inventory_id: Uuid,
    pub credential_id: Uuid,
    pub connection: Option<String>,
    pub forks: u32,
    pub verbosity: u8,
    pub extra_vars: Option<Map<String, Value>>,
    pub become_enabled: bool,
}
