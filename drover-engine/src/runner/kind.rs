//! Process-kind strategies
//!
//! One strategy per thing the engine can execute: a playbook run, an
//! ad-hoc module invocation, or a project SCM update. Each knows which
//! binary to use, what must be present before spawn, and how to render
//! the argument vector. Argument order is fixed so command construction
//! is reproducible and testable.

use std::path::{Path, PathBuf};

use drover_core::domain::job::JobKind;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::vault::StagedCredentials;

/// Argument vector under construction.
///
/// Secret arguments (decrypted passwords rendered as extra-variables)
/// reach the subprocess but are excluded from the audited copy that
/// lands on the job record.
#[derive(Debug, Default)]
pub struct ArgSpec {
    full: Vec<String>,
    audited: Vec<String>,
}

impl ArgSpec {
    fn push(&mut self, arg: impl Into<String>) {
        let arg = arg.into();
        self.audited.push(arg.clone());
        self.full.push(arg);
    }

    fn push_secret(&mut self, arg: impl Into<String>) {
        self.full.push(arg.into());
    }

    /// Everything the subprocess receives.
    pub fn full(&self) -> &[String] {
        &self.full
    }

    /// The vector retained on the job record, secrets excluded.
    pub fn audited(&self) -> &[String] {
        &self.audited
    }
}

/// Strategy shared by all runnable process kinds.
pub trait ProcessKind: Send + Sync {
    /// Binary to execute.
    fn program<'a>(&self, config: &'a Config) -> &'a Path;

    /// Pre-spawn checks; a failure here means no subprocess starts.
    fn validate(&self, ctx: &ExecutionContext) -> Result<()>;

    /// Renders the deterministic argument vector.
    fn build_args(
        &self,
        config: &Config,
        ctx: &ExecutionContext,
        staged: &StagedCredentials,
    ) -> Result<ArgSpec>;

    /// Directory the subprocess runs in; defaults to the job workspace.
    fn working_dir(&self, _config: &Config, ctx: &ExecutionContext) -> PathBuf {
        ctx.workspace_path().to_path_buf()
    }
}

/// Picks the strategy for a job.
pub fn for_job_kind(kind: JobKind) -> &'static dyn ProcessKind {
    match kind {
        JobKind::Playbook => &PlaybookRun,
        JobKind::AdHoc => &AdHocRun,
        JobKind::ProjectUpdate => &ProjectUpdateRun,
    }
}

/// `ansible-playbook` run from a project checkout.
pub struct PlaybookRun;

/// Single-module `ansible` invocation.
pub struct AdHocRun;

/// SCM update driven through the internal update playbook.
pub struct ProjectUpdateRun;

impl ProcessKind for PlaybookRun {
    fn program<'a>(&self, config: &'a Config) -> &'a Path {
        &config.playbook_bin
    }

    fn validate(&self, ctx: &ExecutionContext) -> Result<()> {
        if ctx.job.playbook.as_deref().unwrap_or("").is_empty() {
            return Err(EngineError::MissingRequiredField("playbook"));
        }
        Ok(())
    }

    fn build_args(
        &self,
        _config: &Config,
        ctx: &ExecutionContext,
        staged: &StagedCredentials,
    ) -> Result<ArgSpec> {
        let job = &ctx.job;
        let mut args = ArgSpec::default();

        push_inventory(&mut args, ctx)?;

        if let Some(user) = ctx
            .machine_credential
            .as_ref()
            .and_then(|c| c.login_name())
        {
            args.push("-u");
            args.push(user);
        }

        if job.become_enabled {
            args.push("-b");
            if let Some(cred) = &ctx.machine_credential {
                if let Some(method) = cred.become_method.as_deref() {
                    args.push(format!("--become-method={}", method));
                }
                if let Some(user) = cred.become_username.as_deref() {
                    args.push(format!("--become-user={}", user));
                }
            }
        }

        if job.check_mode {
            args.push("--check");
        }
        if job.forks != 0 {
            args.push("-f");
            args.push(job.forks.to_string());
        }
        if let Some(limit) = non_empty(job.limit.as_deref()) {
            args.push("-l");
            args.push(limit);
        }
        if let Some(flag) = verbosity_flag(job.verbosity) {
            args.push(flag);
        }
        if !job.extra_vars.is_empty() {
            args.push("-e");
            args.push(Value::Object(job.extra_vars.clone()).to_string());
        }
        if let Some(tags) = non_empty(job.job_tags.as_deref()) {
            args.push("-t");
            args.push(tags);
        }
        if let Some(skip) = non_empty(job.skip_tags.as_deref()) {
            args.push(format!("--skip-tags={}", skip));
        }
        if job.force_handlers {
            args.push("--force-handlers");
        }
        if let Some(task) = non_empty(job.start_at_task.as_deref()) {
            args.push(format!("--start-at-task={}", task));
        }

        // Identification variables the callback plugins rely on.
        let mut system_vars = Map::new();
        system_vars.insert(
            "drover_job_id".to_string(),
            Value::String(job.id.to_string()),
        );
        system_vars.insert(
            "drover_user".to_string(),
            Value::String(job.created_by.clone()),
        );
        if let Some(template) = &ctx.template {
            system_vars.insert(
                "drover_template_id".to_string(),
                Value::String(template.id.to_string()),
            );
            system_vars.insert(
                "drover_template_name".to_string(),
                Value::String(template.name.clone()),
            );
        }
        args.push("-e");
        args.push(Value::Object(system_vars).to_string());

        push_secret_vars(&mut args, staged);

        // Positional playbook, validated above.
        args.push(job.playbook.clone().unwrap_or_default());

        Ok(args)
    }

    fn working_dir(&self, config: &Config, ctx: &ExecutionContext) -> PathBuf {
        match &ctx.project {
            Some(project) => config.projects_root.join(project.id.to_string()),
            None => ctx.workspace_path().to_path_buf(),
        }
    }
}

impl ProcessKind for AdHocRun {
    fn program<'a>(&self, config: &'a Config) -> &'a Path {
        &config.ansible_bin
    }

    fn validate(&self, ctx: &ExecutionContext) -> Result<()> {
        if ctx.job.module_name.as_deref().unwrap_or("").is_empty() {
            return Err(EngineError::MissingRequiredField("module"));
        }
        if let Some(connection) = non_empty(ctx.job.connection.as_deref()) {
            if connection == "winrm" {
                return Err(EngineError::UnsupportedConnection(connection));
            }
        }
        Ok(())
    }

    fn build_args(
        &self,
        _config: &Config,
        ctx: &ExecutionContext,
        staged: &StagedCredentials,
    ) -> Result<ArgSpec> {
        let job = &ctx.job;
        let mut args = ArgSpec::default();

        // Host pattern comes first for ad-hoc invocations.
        args.push(job.pattern.clone().unwrap_or_else(|| "all".to_string()));

        push_inventory(&mut args, ctx)?;

        args.push("-m");
        args.push(job.module_name.clone().unwrap_or_default());
        if let Some(module_args) = non_empty(job.module_args.as_deref()) {
            args.push("-a");
            args.push(module_args);
        }

        if let Some(user) = ctx
            .machine_credential
            .as_ref()
            .and_then(|c| c.login_name())
        {
            args.push("-u");
            args.push(user);
        }
        if job.become_enabled {
            args.push("-b");
        }
        if job.forks != 0 {
            args.push("-f");
            args.push(job.forks.to_string());
        }
        if let Some(connection) = non_empty(job.connection.as_deref()) {
            args.push("-c");
            args.push(connection);
        }
        if let Some(flag) = verbosity_flag(job.verbosity) {
            args.push(flag);
        }
        if !job.extra_vars.is_empty() {
            args.push("-e");
            args.push(Value::Object(job.extra_vars.clone()).to_string());
        }

        push_secret_vars(&mut args, staged);

        Ok(args)
    }
}

impl ProcessKind for ProjectUpdateRun {
    fn program<'a>(&self, config: &'a Config) -> &'a Path {
        &config.playbook_bin
    }

    fn validate(&self, ctx: &ExecutionContext) -> Result<()> {
        if ctx.project.is_none() {
            return Err(EngineError::MissingRequiredField("project"));
        }
        Ok(())
    }

    fn build_args(
        &self,
        config: &Config,
        ctx: &ExecutionContext,
        staged: &StagedCredentials,
    ) -> Result<ArgSpec> {
        // Presence checked in validate().
        let project = ctx
            .project
            .as_ref()
            .ok_or(EngineError::MissingRequiredField("project"))?;

        let mut args = ArgSpec::default();
        args.push("-i");
        args.push("localhost,");
        args.push("-v");

        let mut update_vars = Map::new();
        update_vars.insert(
            "scm_url".to_string(),
            Value::String(project.scm_url.clone()),
        );
        if let Some(branch) = non_empty(project.scm_branch.as_deref()) {
            update_vars.insert("scm_branch".to_string(), Value::String(branch));
        }
        update_vars.insert(
            "project_path".to_string(),
            Value::String(
                config
                    .projects_root
                    .join(project.id.to_string())
                    .to_string_lossy()
                    .into_owned(),
            ),
        );
        args.push("-e");
        args.push(Value::Object(update_vars).to_string());

        push_secret_vars(&mut args, staged);

        args.push(config.update_playbook.to_string_lossy().into_owned());

        Ok(args)
    }
}

/// Mandatory `-i` argument; absence is a hard error, never a default.
fn push_inventory(args: &mut ArgSpec, ctx: &ExecutionContext) -> Result<()> {
    let target = ctx
        .inventory
        .as_ref()
        .and_then(|inv| inv.target_argument())
        .ok_or(EngineError::MissingInventory)?;
    args.push("-i");
    args.push(target);
    Ok(())
}

/// Secret extra-variables, key-sorted so the vector stays deterministic.
fn push_secret_vars(args: &mut ArgSpec, staged: &StagedCredentials) {
    let mut keys: Vec<&String> = staged.secret_vars.keys().collect();
    keys.sort();
    for key in keys {
        if let Some(Value::String(value)) = staged.secret_vars.get(key) {
            args.push_secret("-e");
            args.push_secret(format!("{}={}", key, value));
        }
    }
}

fn verbosity_flag(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("-v"),
        2 => Some("-vv"),
        3 => Some("-vvv"),
        _ => Some("-vvvv"),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use drover_core::domain::inventory::Inventory;
    use drover_core::domain::job::{Job, JobKind};
    use std::sync::Arc;

    async fn context_for(mut job: Job, hosts: &[&str]) -> ExecutionContext {
        let store = Arc::new(MemoryStore::new());
        if !hosts.is_empty() {
            let mut inventory = Inventory::new("test");
            inventory.hosts = hosts.iter().map(|h| h.to_string()).collect();
            job.inventory_id = Some(inventory.id);
            store.add_inventory(inventory);
        }
        crate::context::ContextBuilder::new(store, std::env::temp_dir().join("drover-test"))
            .build(job)
            .await
            .unwrap()
    }

    fn staged() -> StagedCredentials {
        StagedCredentials::default()
    }

    #[tokio::test]
    async fn test_adhoc_missing_module_fails_before_spawn() {
        let job = Job::new(JobKind::AdHoc, "noop", "admin");
        let ctx = context_for(job, &["10.0.0.1"]).await;
        let err = AdHocRun.validate(&ctx).unwrap_err();
        assert!(matches!(err, EngineError::MissingRequiredField("module")));
    }

    #[tokio::test]
    async fn test_adhoc_winrm_rejected() {
        let mut job = Job::new(JobKind::AdHoc, "win", "admin");
        job.module_name = Some("win_ping".to_string());
        job.connection = Some("winrm".to_string());
        let ctx = context_for(job, &["10.0.0.1"]).await;
        let err = AdHocRun.validate(&ctx).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedConnection(_)));
    }

    #[tokio::test]
    async fn test_adhoc_missing_inventory_is_hard_error() {
        let mut job = Job::new(JobKind::AdHoc, "ping", "admin");
        job.module_name = Some("ping".to_string());
        let ctx = context_for(job, &[]).await;
        let err = AdHocRun.build_args(&Config::default(), &ctx, &staged()).unwrap_err();
        assert!(matches!(err, EngineError::MissingInventory));
    }

    #[tokio::test]
    async fn test_adhoc_argument_order_is_stable() {
        let mut job = Job::new(JobKind::AdHoc, "ping", "admin");
        job.module_name = Some("ping".to_string());
        job.forks = 5;
        job.verbosity = 2;
        let ctx = context_for(job, &["10.0.0.1"]).await;

        let args = AdHocRun.build_args(&Config::default(), &ctx, &staged()).unwrap();
        assert_eq!(
            args.full(),
            ["all", "-i", "10.0.0.1,", "-m", "ping", "-f", "5", "-vv"]
        );
        assert_eq!(args.full(), args.audited());
    }

    #[tokio::test]
    async fn test_playbook_missing_playbook_fails() {
        let job = Job::new(JobKind::Playbook, "deploy", "admin");
        let ctx = context_for(job, &["10.0.0.1"]).await;
        let err = PlaybookRun.validate(&ctx).unwrap_err();
        assert!(matches!(err, EngineError::MissingRequiredField("playbook")));
    }

    #[tokio::test]
    async fn test_playbook_args_end_with_playbook_and_hide_secrets() {
        let mut job = Job::new(JobKind::Playbook, "deploy", "admin");
        job.playbook = Some("site.yml".to_string());
        job.limit = Some("web".to_string());
        let ctx = context_for(job, &["10.0.0.1", "10.0.0.2"]).await;

        let mut creds = StagedCredentials::default();
        creds.secret_vars.insert(
            "ansible_ssh_pass".to_string(),
            Value::String("hunter2".to_string()),
        );

        let args = PlaybookRun.build_args(&Config::default(), &ctx, &creds).unwrap();

        assert_eq!(args.full().last().map(String::as_str), Some("site.yml"));
        assert!(args.full().iter().any(|a| a == "ansible_ssh_pass=hunter2"));
        assert!(!args.audited().iter().any(|a| a.contains("hunter2")));
        assert_eq!(args.audited().last().map(String::as_str), Some("site.yml"));
        assert_eq!(&args.full()[..2], &["-i", "10.0.0.1,10.0.0.2,"]);
    }

    #[tokio::test]
    async fn test_playbook_defaults_omit_optional_flags() {
        let mut job = Job::new(JobKind::Playbook, "deploy", "admin");
        job.playbook = Some("site.yml".to_string());
        let ctx = context_for(job, &["10.0.0.1"]).await;

        let args = PlaybookRun.build_args(&Config::default(), &ctx, &staged()).unwrap();
        for flag in ["-f", "-l", "-t", "--check", "--force-handlers"] {
            assert!(!args.full().iter().any(|a| a == flag), "unexpected {}", flag);
        }
    }

    #[tokio::test]
    async fn test_verbosity_caps_at_four() {
        assert_eq!(verbosity_flag(0), None);
        assert_eq!(verbosity_flag(1), Some("-v"));
        assert_eq!(verbosity_flag(4), Some("-vvvv"));
        assert_eq!(verbosity_flag(9), Some("-vvvv"));
    }
}
