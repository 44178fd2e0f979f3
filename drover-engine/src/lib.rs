//! Drover Engine
//!
//! Job execution and queueing engine for Ansible automation.
//!
//! Architecture:
//! - Launch coordinator: materializes jobs from templates and requests
//! - Scheduler: single-flight FIFO queue with prerequisite gating
//! - Context builder: resolves a job's references into one descriptor
//! - Credential vault: decrypts secrets and stages SSH keys per run
//! - Process runner: spawns `ansible`/`ansible-playbook` subprocesses
//! - Output sink: persists and streams subprocess output lines
//!
//! Jobs flow launch → queue → worker → terminal status; the worker
//! owns the per-run workspace and credential material, both of which
//! are gone once the job record reaches a terminal state.

pub mod config;
pub mod context;
pub mod error;
pub mod launch;
pub mod runner;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod vault;
pub mod worker;

use std::sync::Arc;

pub use config::Config;
pub use error::{EngineError, Result};
pub use launch::LaunchCoordinator;
pub use scheduler::Scheduler;
pub use sink::{JobEvent, OutputSink};
pub use store::{JobStore, MemoryStore};
pub use vault::{cipher::Cipher, CredentialVault};

/// Wired-up engine: one scheduler loop, one sink, one coordinator.
pub struct Engine {
    coordinator: LaunchCoordinator,
    scheduler: Scheduler,
    sink: Arc<OutputSink>,
    vault: Arc<CredentialVault>,
}

impl Engine {
    /// Builds the engine over a store. Fails when the configuration is
    /// invalid (bad key length, zero intervals).
    pub fn new(config: Config, store: Arc<dyn JobStore>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let cipher = Cipher::new(&config.secret_key)?;
        let vault = Arc::new(CredentialVault::new(cipher));
        let sink = OutputSink::new(store.clone());
        let scheduler = Scheduler::start(store.clone(), sink.clone(), vault.clone(), config.clone());
        let coordinator = LaunchCoordinator::new(store, scheduler.clone(), config);

        Ok(Self {
            coordinator,
            scheduler,
            sink,
            vault,
        })
    }

    pub fn launcher(&self) -> &LaunchCoordinator {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Live feed of output lines and status changes across all jobs.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.sink.subscribe()
    }

    /// Vault access for encrypting credential fields on intake.
    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
