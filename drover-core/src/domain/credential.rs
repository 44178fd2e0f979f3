//! Credential domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored credential.
///
/// Secret fields (`password`, `ssh_key_data`, `ssh_key_unlock`,
/// `become_password`) are encrypted at rest and only ever decrypted by
/// the engine's vault adapter for the duration of one job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub name: String,
    pub kind: CredentialKind,
    pub organization_id: Option<Uuid>,

    pub username: Option<String>,
    /// Appended to the username as `user@domain` when present.
    pub domain: Option<String>,
    /// Encrypted login or SSH password.
    pub password: Option<String>,
    /// Encrypted PEM private key material.
    pub ssh_key_data: Option<String>,
    /// Encrypted passphrase unlocking `ssh_key_data`.
    pub ssh_key_unlock: Option<String>,

    pub become_method: Option<String>,
    pub become_username: Option<String>,
    /// Encrypted privilege-escalation password.
    pub become_password: Option<String>,
}

impl Credential {
    pub fn new(name: impl Into<String>, kind: CredentialKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            organization_id: None,
            username: None,
            domain: None,
            password: None,
            ssh_key_data: None,
            ssh_key_unlock: None,
            become_method: None,
            become_username: None,
            become_password: None,
        }
    }

    /// Login name with the domain appended when one is set.
    pub fn login_name(&self) -> Option<String> {
        let username = self.username.as_deref()?;
        match self.domain.as_deref() {
            Some(domain) => Some(format!("{}@{}", username, domain)),
            None => Some(username.to_string()),
        }
    }

    /// Only `ssh` and `password` credentials have an execution strategy;
    /// every other kind is rejected before a subprocess is spawned.
    pub fn is_runnable(&self) -> bool {
        matches!(self.kind, CredentialKind::Ssh | CredentialKind::Password)
    }
}

/// Kind of credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialKind {
    /// SSH key based machine access.
    Ssh,
    /// Username/password machine access.
    Password,
    /// Windows/WinRM access (not runnable by this engine).
    Windows,
    /// SCM checkout credential.
    Scm,
    /// Cloud provider API credential.
    Cloud,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CredentialKind::Ssh => "ssh",
            CredentialKind::Password => "password",
            CredentialKind::Windows => "windows",
            CredentialKind::Scm => "scm",
            CredentialKind::Cloud => "cloud",
        };
        write!(f, "{}", s)
    }
}
