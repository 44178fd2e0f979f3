//! Execution context for jobs
//!
//! All state one worker needs to run one job: the job record, the
//! resolved entities it references, and a per-run workspace directory.
//! The workspace is a `TempDir`, so it is wiped when the context is
//! dropped, whatever the outcome of the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use drover_core::domain::credential::Credential;
use drover_core::domain::inventory::Inventory;
use drover_core::domain::job::Job;
use drover_core::domain::project::Project;
use drover_core::domain::template::JobTemplate;
use tempfile::TempDir;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::store::JobStore;

/// Immutable execution descriptor, built once per run and owned
/// exclusively by the worker executing that job.
#[derive(Debug)]
pub struct ExecutionContext {
    pub job: Job,
    pub template: Option<JobTemplate>,
    pub project: Option<Project>,
    pub inventory: Option<Inventory>,
    pub machine_credential: Option<Credential>,
    pub network_credential: Option<Credential>,
    pub cloud_credential: Option<Credential>,
    workspace: TempDir,
}

impl ExecutionContext {
    /// Per-run temporary workspace; removed when the context drops.
    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    /// Credentials the vault must stage for this run.
    pub fn credentials_to_stage(&self) -> Vec<&Credential> {
        [&self.machine_credential, &self.network_credential]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Resolves a job's referenced entities into an [`ExecutionContext`].
pub struct ContextBuilder {
    store: Arc<dyn JobStore>,
    tmp_root: PathBuf,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn JobStore>, tmp_root: PathBuf) -> Self {
        Self { store, tmp_root }
    }

    /// Builds the context for one job.
    ///
    /// Fails with `NotFound` when any referenced entity is missing and
    /// `UnsupportedCredentialKind` when the machine credential has no
    /// execution strategy. Argument-level validation (playbook/module
    /// presence, connection type) happens in the process runner.
    pub async fn build(&self, job: Job) -> Result<ExecutionContext> {
        let template = match job.template_id {
            Some(id) => Some(
                self.store
                    .template(id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("job template", id))?,
            ),
            None => None,
        };

        let project = match job.project_id {
            Some(id) => Some(
                self.store
                    .project(id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("project", id))?,
            ),
            None => None,
        };

        let inventory = match job.inventory_id {
            Some(id) => Some(
                self.store
                    .inventory(id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("inventory", id))?,
            ),
            None => None,
        };

        let machine_credential = self.resolve_credential(job.machine_credential_id).await?;
        if let Some(credential) = &machine_credential {
            if !credential.is_runnable() {
                return Err(EngineError::UnsupportedCredentialKind(credential.kind));
            }
        }

        let network_credential = self.resolve_credential(job.network_credential_id).await?;
        let cloud_credential = self.resolve_credential(job.cloud_credential_id).await?;

        tokio::fs::create_dir_all(&self.tmp_root)
            .await
            .map_err(|e| {
                EngineError::Internal(format!(
                    "could not create tmp root {}: {}",
                    self.tmp_root.display(),
                    e
                ))
            })?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job.id))
            .tempdir_in(&self.tmp_root)
            .map_err(|e| EngineError::Internal(format!("could not create workspace: {}", e)))?;

        debug!(job_id = %job.id, workspace = %workspace.path().display(), "execution context built");

        Ok(ExecutionContext {
            job,
            template,
            project,
            inventory,
            machine_credential,
            network_credential,
            cloud_credential,
            workspace,
        })
    }

    async fn resolve_credential(&self, id: Option<uuid::Uuid>) -> Result<Option<Credential>> {
        match id {
            Some(id) => Ok(Some(
                self.store
                    .credential(id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("credential", id))?,
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use drover_core::domain::credential::CredentialKind;
    use drover_core::domain::job::JobKind;

    fn builder(store: Arc<MemoryStore>) -> ContextBuilder {
        ContextBuilder::new(store, std::env::temp_dir().join("drover-test"))
    }

    #[tokio::test]
    async fn test_missing_inventory_reference_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let mut job = Job::new(JobKind::AdHoc, "ping", "admin");
        job.inventory_id = Some(uuid::Uuid::new_v4());

        let err = builder(store).build(job).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "inventory", .. }));
    }

    #[tokio::test]
    async fn test_unrunnable_machine_credential_rejected() {
        let store = Arc::new(MemoryStore::new());
        let cred = Credential::new("win", CredentialKind::Windows);
        let cred_id = cred.id;
        store.add_credential(cred);

        let mut job = Job::new(JobKind::AdHoc, "ping", "admin");
        job.machine_credential_id = Some(cred_id);

        let err = builder(store).build(job).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedCredentialKind(CredentialKind::Windows)));
    }

    #[tokio::test]
    async fn test_workspace_removed_on_drop() {
        let store = Arc::new(MemoryStore::new());
        let job = Job::new(JobKind::AdHoc, "ping", "admin");

        let ctx = builder(store).build(job).await.unwrap();
        let path = ctx.workspace_path().to_path_buf();
        assert!(path.exists());
        drop(ctx);
        assert!(!path.exists());
    }
}
