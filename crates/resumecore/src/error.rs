use crate::{HookToken, RunId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Step '{step}' failed: {message}")]
    StepFailure { step: String, message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unknown hook: {0}")]
    UnknownHook(HookToken),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Hook already resolved: {0}")]
    AlreadyResolved(HookToken),

    /// The program reached a hook with no resolution yet. Not a failure: the
    /// run parks until the hook is resolved and is then re-driven.
    #[error("Run suspended awaiting hook {token}")]
    Suspended { token: HookToken },

    #[error("Replay diverged at step {position}: log has '{expected}', program requested '{found}'")]
    NonDeterministic {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RunError {
    pub fn step_failure(step: impl Into<String>, message: impl Into<String>) -> Self {
        RunError::StepFailure {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn is_suspension(&self) -> bool {
        matches!(self, RunError::Suspended { .. })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record for run {run_id}: {reason}")]
    Corrupt { run_id: RunId, reason: String },
}

/// A hook payload that does not match the schema registered for its token.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Payload must be a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid type for '{field}': expected {expected}, got {actual}")]
    InvalidType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Unexpected field: {0}")]
    UnexpectedField(String),
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Script exhausted after {0} turns")]
    ScriptExhausted(usize),
}
