//! Error types for the execution engine

use drover_core::domain::credential::CredentialKind;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while launching or executing a job.
///
/// Launch-time errors (`Validation`, `NotFound`) are surfaced to the
/// caller before any job record exists. Everything else is caught by
/// the worker and converted into a terminal job status; the scheduler
/// loop itself never crashes on one of these.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or missing launch parameters; the job is never created
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    /// Credential kind with no execution strategy
    #[error("credential kind '{0}' has no execution strategy")]
    UnsupportedCredentialKind(CredentialKind),

    /// Decryption or SSH agent staging failed before spawn
    #[error("credential injection failed: {0}")]
    CredentialInjection(String),

    /// A field required for execution was absent
    #[error("required field missing: {0}")]
    MissingRequiredField(&'static str),

    /// No inventory target could be derived for the job
    #[error("job has no inventory target")]
    MissingInventory,

    /// Remote connection type the engine refuses to drive
    #[error("unsupported connection type: {0}")]
    UnsupportedConnection(String),

    /// OS-level failure executing the external program
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Subprocess ran and exited non-zero
    #[error("process exited with code {0}")]
    ProcessExit(i32),

    /// Execution exceeded the configured timeout and was killed
    #[error("job exceeded timeout of {0:?} and was killed")]
    Timeout(std::time::Duration),

    /// The running subprocess was killed by a cancel request
    #[error("job canceled")]
    Canceled,

    /// Status or log write failed; logged, never fails the job itself
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Secret field could not be encrypted or decrypted
    #[error("cipher failure: {0}")]
    Cipher(String),

    /// Engine-internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Shorthand for a missing referenced entity
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }
}
