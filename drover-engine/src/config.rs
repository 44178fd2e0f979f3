//! Engine configuration
//!
//! Defines all configurable parameters for the execution engine:
//! binary locations, directory roots, scheduler timing, and the secret
//! key protecting credential fields at rest.

use std::path::PathBuf;
use std::time::Duration;

use rand::RngCore;

use crate::error::{EngineError, Result};

/// Engine configuration
///
/// The binaries are configurable so deployments can pin specific
/// ansible installations (and tests can substitute stand-ins).
#[derive(Debug, Clone)]
pub struct Config {
    /// Root under which per-job workspaces are created
    pub tmp_root: PathBuf,

    /// Root holding project checkouts, one directory per project id
    pub projects_root: PathBuf,

    /// Binary for ad-hoc runs (normally `ansible`)
    pub ansible_bin: PathBuf,

    /// Binary for playbook and update runs (normally `ansible-playbook`)
    pub playbook_bin: PathBuf,

    /// Playbook driving project SCM updates
    pub update_playbook: PathBuf,

    /// How often the scheduler re-checks the queue
    pub tick_interval: Duration,

    /// Maximum wall-clock time a job may run before it is killed
    pub job_timeout: Duration,

    /// 32-byte AES-256 key protecting credential fields at rest
    pub secret_key: Vec<u8>,
}

impl Config {
    /// Creates a configuration with the given secret key and defaults
    /// for everything else.
    pub fn new(secret_key: Vec<u8>) -> Self {
        Self {
            tmp_root: std::env::temp_dir().join("drover"),
            projects_root: PathBuf::from("/var/lib/drover/projects"),
            ansible_bin: PathBuf::from("ansible"),
            playbook_bin: PathBuf::from("ansible-playbook"),
            update_playbook: PathBuf::from("/var/lib/drover/playbooks/project_update.yml"),
            tick_interval: Duration::from_secs(2),
            job_timeout: Duration::from_secs(3600),
            secret_key,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DROVER_SECRET_KEY (required, 64 hex characters)
    /// - DROVER_TMP_ROOT (optional)
    /// - DROVER_PROJECTS_ROOT (optional)
    /// - DROVER_ANSIBLE_BIN / DROVER_PLAYBOOK_BIN (optional)
    /// - DROVER_UPDATE_PLAYBOOK (optional)
    /// - DROVER_TICK_INTERVAL (optional, seconds, default: 2)
    /// - DROVER_JOB_TIMEOUT (optional, seconds, default: 3600)
    pub fn from_env() -> Result<Self> {
        let key_hex = std::env::var("DROVER_SECRET_KEY")
            .map_err(|_| EngineError::Validation("DROVER_SECRET_KEY not set".to_string()))?;
        let secret_key = decode_hex(&key_hex)
            .ok_or_else(|| EngineError::Validation("DROVER_SECRET_KEY is not valid hex".to_string()))?;

        let mut config = Self::new(secret_key);

        if let Ok(v) = std::env::var("DROVER_TMP_ROOT") {
            config.tmp_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DROVER_PROJECTS_ROOT") {
            config.projects_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DROVER_ANSIBLE_BIN") {
            config.ansible_bin = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DROVER_PLAYBOOK_BIN") {
            config.playbook_bin = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DROVER_UPDATE_PLAYBOOK") {
            config.update_playbook = PathBuf::from(v);
        }
        if let Some(secs) = std::env::var("DROVER_TICK_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = std::env::var("DROVER_JOB_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.job_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.secret_key.len() != 32 {
            return Err(EngineError::Validation(
                "secret_key must be exactly 32 bytes".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(EngineError::Validation(
                "tick_interval must be greater than 0".to_string(),
            ));
        }
        if self.job_timeout.is_zero() {
            return Err(EngineError::Validation(
                "job_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    /// A default configuration with a random throwaway secret key,
    /// suitable for embedded and test use only.
    fn default() -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key)
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert_eq!(config.tick_interval, Duration::from_secs(2));
        assert_eq!(config.secret_key.len(), 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_key_rejected() {
        let config = Config::new(vec![0u8; 16]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_tick_rejected() {
        let mut config = Config::default();
        config.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("00ff"), Some(vec![0x00, 0xff]));
        assert_eq!(decode_hex("0"), None);
        assert_eq!(decode_hex("zz"), None);
    }
}
