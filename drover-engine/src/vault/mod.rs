//! Credential vault adapter
//!
//! Decrypts stored secret fields and stages them for exactly one job's
//! lifetime: SSH keys go into a transient agent, passwords become
//! secret extra-variables that never touch disk. Whatever was staged is
//! torn down on every exit path of the owning job.

pub mod agent;
pub mod cipher;

use std::path::Path;

use drover_core::domain::credential::{Credential, CredentialKind};
use serde_json::{Map, Value};
use tracing::{debug, error};

pub use agent::SshAgent;
pub use cipher::Cipher;

use crate::error::{EngineError, Result};

/// Stages decrypted credential material for one job execution.
pub struct CredentialVault {
    cipher: Cipher,
}

/// Material staged for one run.
///
/// Owned by the worker executing the job; [`StagedCredentials::cleanup`]
/// must run on every exit path (the `Drop` impl of the inner agent is
/// the best-effort backstop).
#[derive(Debug, Default)]
pub struct StagedCredentials {
    /// Agent holding loaded SSH keys, when any credential carried key material.
    pub agent: Option<SshAgent>,
    /// Secret extra-variables (`ansible_ssh_pass`, `ansible_become_pass`);
    /// injected into the argument vector but excluded from audit fields.
    pub secret_vars: Map<String, Value>,
}

impl StagedCredentials {
    /// Tears down the staged agent. Idempotent.
    pub async fn cleanup(&mut self) {
        if let Some(agent) = self.agent.as_mut() {
            agent.shutdown().await;
        }
        self.agent = None;
        self.secret_vars.clear();
    }
}

impl CredentialVault {
    pub fn new(cipher: Cipher) -> Self {
        Self { cipher }
    }

    /// Access to the underlying cipher, for encrypting fields on intake.
    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Stages every given credential into `workspace`.
    ///
    /// Fails with `CredentialInjection` on decryption or agent trouble
    /// and with `UnsupportedCredentialKind` for kinds the engine cannot
    /// run; partially staged material is cleaned up before returning.
    pub async fn stage(
        &self,
        workspace: &Path,
        credentials: &[&Credential],
    ) -> Result<StagedCredentials> {
        let mut staged = StagedCredentials::default();

        match self.stage_inner(workspace, credentials, &mut staged).await {
            Ok(()) => Ok(staged),
            Err(e) => {
                error!("credential staging failed: {}", e);
                staged.cleanup().await;
                Err(e)
            }
        }
    }

    async fn stage_inner(
        &self,
        workspace: &Path,
        credentials: &[&Credential],
        staged: &mut StagedCredentials,
    ) -> Result<()> {
        for credential in credentials {
            match credential.kind {
                CredentialKind::Ssh => {
                    self.stage_ssh(workspace, credential, staged).await?;
                }
                CredentialKind::Password => {
                    self.stage_password(credential, staged)?;
                }
                kind => return Err(EngineError::UnsupportedCredentialKind(kind)),
            }

            if let Some(become_password) = credential.become_password.as_deref() {
                let plain = self.decrypt_secret(become_password)?;
                if !plain.is_empty() {
                    staged
                        .secret_vars
                        .insert("ansible_become_pass".to_string(), Value::String(plain));
                }
            }
        }
        Ok(())
    }

    /// SSH kind: key material into the agent; an SSH password (key-less
    /// setups) becomes a secret extra-variable instead.
    async fn stage_ssh(
        &self,
        workspace: &Path,
        credential: &Credential,
        staged: &mut StagedCredentials,
    ) -> Result<()> {
        if let Some(key_data) = credential.ssh_key_data.as_deref() {
            let key_pem = self.decrypt_secret(key_data)?;
            let passphrase = match credential.ssh_key_unlock.as_deref() {
                Some(token) => {
                    let plain = self.decrypt_secret(token)?;
                    (!plain.is_empty()).then_some(plain)
                }
                None => None,
            };

            if staged.agent.is_none() {
                staged.agent = Some(SshAgent::start().await?);
            }
            // stage() guarantees staged is cleaned up if this fails
            let agent = staged
                .agent
                .as_ref()
                .ok_or_else(|| EngineError::Internal("agent vanished during staging".into()))?;
            agent
                .add_key(workspace, &key_pem, passphrase.as_deref())
                .await?;

            debug!(credential = %credential.name, "ssh key staged into agent");
        } else if let Some(password) = credential.password.as_deref() {
            let plain = self.decrypt_secret(password)?;
            if !plain.is_empty() {
                staged
                    .secret_vars
                    .insert("ansible_ssh_pass".to_string(), Value::String(plain));
            }
        }
        Ok(())
    }

    /// Password kind: decrypted password injected as a secret
    /// extra-variable, never written to disk.
    fn stage_password(
        &self,
        credential: &Credential,
        staged: &mut StagedCredentials,
    ) -> Result<()> {
        let Some(password) = credential.password.as_deref() else {
            return Err(EngineError::CredentialInjection(format!(
                "credential '{}' has no password field",
                credential.name
            )));
        };
        let plain = self.decrypt_secret(password)?;
        staged
            .secret_vars
            .insert("ansible_ssh_pass".to_string(), Value::String(plain));
        debug!(credential = %credential.name, "password staged as extra-variable");
        Ok(())
    }

    fn decrypt_secret(&self, token: &str) -> Result<String> {
        self.cipher
            .decrypt(token)
            .map_err(|e| EngineError::CredentialInjection(e.to_string()))
    }
}
