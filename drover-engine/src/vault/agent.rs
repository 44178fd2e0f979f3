//! Transient SSH agent lifecycle
//!
//! Each job that carries SSH key material gets its own `ssh-agent`
//! process. Keys are handed to the agent through `ssh-add` with the key
//! written to an owner-only file inside the job workspace and removed
//! as soon as the add completes; passphrases travel via an
//! `SSH_ASKPASS` helper and an environment variable, never on disk.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Env var the askpass helper reads the passphrase from.
const PASSPHRASE_VAR: &str = "DROVER_KEY_PASSPHRASE";

/// A running `ssh-agent` owned by exactly one job.
#[derive(Debug)]
pub struct SshAgent {
    socket: PathBuf,
    pid: u32,
    alive: bool,
}

impl SshAgent {
    /// Spawns `ssh-agent -s` and parses the socket path and pid from
    /// its shell-format output.
    pub async fn start() -> Result<Self> {
        let output = Command::new("ssh-agent")
            .arg("-s")
            .output()
            .await
            .map_err(|e| {
                EngineError::CredentialInjection(format!("could not start ssh-agent: {}", e))
            })?;

        if !output.status.success() {
            return Err(EngineError::CredentialInjection(format!(
                "ssh-agent exited with code {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        // Output looks like:
        //   SSH_AUTH_SOCK=/tmp/ssh-XXXX/agent.123; export SSH_AUTH_SOCK;
        //   SSH_AGENT_PID=124; export SSH_AGENT_PID;
        let text = String::from_utf8_lossy(&output.stdout);
        let socket = parse_assignment(&text, "SSH_AUTH_SOCK").ok_or_else(|| {
            EngineError::CredentialInjection("SSH_AUTH_SOCK missing from ssh-agent output".into())
        })?;
        let pid = parse_assignment(&text, "SSH_AGENT_PID")
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| {
                EngineError::CredentialInjection(
                    "SSH_AGENT_PID missing from ssh-agent output".into(),
                )
            })?;

        debug!(pid, socket = %socket, "ssh-agent started");

        Ok(Self {
            socket: PathBuf::from(socket),
            pid,
            alive: true,
        })
    }

    /// Path of the agent's UNIX socket, for `SSH_AUTH_SOCK`.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Loads a decrypted private key into the agent.
    ///
    /// The key is written under `workspace` with owner-only permissions
    /// and deleted again once `ssh-add` returns, whatever the outcome.
    /// A wrong passphrase surfaces as `ssh-add` exiting non-zero.
    pub async fn add_key(
        &self,
        workspace: &Path,
        key_pem: &str,
        passphrase: Option<&str>,
    ) -> Result<()> {
        let key_path = workspace.join(format!("key-{}", uuid::Uuid::new_v4()));
        write_owner_only(&key_path, key_pem).await?;

        let result = self.run_ssh_add(workspace, &key_path, passphrase).await;

        if let Err(e) = tokio::fs::remove_file(&key_path).await {
            warn!(path = %key_path.display(), "failed to remove staged key file: {}", e);
        }

        result
    }

    async fn run_ssh_add(
        &self,
        workspace: &Path,
        key_path: &Path,
        passphrase: Option<&str>,
    ) -> Result<()> {
        let mut cmd = Command::new("ssh-add");
        cmd.arg(key_path)
            .env("SSH_AUTH_SOCK", &self.socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let askpass = if let Some(pass) = passphrase {
            // ssh-add consults SSH_ASKPASS when it has no terminal; the
            // helper prints the passphrase from the environment.
            let helper = workspace.join("askpass.sh");
            write_owner_only(&helper, "#!/bin/sh\nprintf '%s' \"$DROVER_KEY_PASSPHRASE\"\n")
                .await?;
            set_executable(&helper)?;
            cmd.env("SSH_ASKPASS", &helper)
                .env("SSH_ASKPASS_REQUIRE", "force")
                .env("DISPLAY", ":0")
                .env(PASSPHRASE_VAR, pass);
            Some(helper)
        } else {
            None
        };

        let output = cmd.output().await.map_err(|e| {
            EngineError::CredentialInjection(format!("could not run ssh-add: {}", e))
        })?;

        if let Some(helper) = askpass {
            let _ = tokio::fs::remove_file(helper).await;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::CredentialInjection(format!(
                "ssh-add failed: {}",
                stderr.trim()
            )));
        }

        debug!(pid = self.pid, "key loaded into ssh-agent");
        Ok(())
    }

    /// Kills the agent and removes its socket directory.
    pub async fn shutdown(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;

        match Command::new("kill").arg(self.pid.to_string()).output().await {
            Ok(out) if out.status.success() => debug!(pid = self.pid, "ssh-agent stopped"),
            Ok(out) => warn!(
                pid = self.pid,
                "kill exited with code {}",
                out.status.code().unwrap_or(-1)
            ),
            Err(e) => warn!(pid = self.pid, "failed to kill ssh-agent: {}", e),
        }

        if let Some(dir) = self.socket.parent() {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                debug!(dir = %dir.display(), "could not remove agent socket dir: {}", e);
            }
        }
    }
}

impl Drop for SshAgent {
    fn drop(&mut self) {
        // Backstop for paths that skipped shutdown().
        if self.alive {
            let _ = std::process::Command::new("kill")
                .arg(self.pid.to_string())
                .output();
            if let Some(dir) = self.socket.parent() {
                let _ = std::fs::remove_dir_all(dir);
            }
        }
    }
}

/// Extracts `NAME=value` from `ssh-agent -s` output.
fn parse_assignment(text: &str, name: &str) -> Option<String> {
    for field in text.split(';') {
        let field = field.trim();
        if let Some(value) = field.strip_prefix(&format!("{}=", name)) {
            return Some(value.to_string());
        }
    }
    None
}

async fn write_owner_only(path: &Path, contents: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await
        .map_err(|e| {
            EngineError::CredentialInjection(format!(
                "could not create {}: {}",
                path.display(),
                e
            ))
        })?;
    file.write_all(contents.as_bytes()).await.map_err(|e| {
        EngineError::CredentialInjection(format!("could not write {}: {}", path.display(), e))
    })?;
    file.flush().await.map_err(|e| {
        EngineError::CredentialInjection(format!("could not flush {}: {}", path.display(), e))
    })?;
    Ok(())
}

fn set_executable(path: &Path) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
        EngineError::CredentialInjection(format!("could not chmod {}: {}", path.display(), e))
    })
}
