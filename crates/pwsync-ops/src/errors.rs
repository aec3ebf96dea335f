//! Error types for the operation engine.

use std::time::Duration;

use pwsync_core::errors::ConfigError;
use pwsync_git::errors::GitError;

use crate::identity::AgentErrorCode;

/// Errors building or running an operation.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The builder could not produce any command.
    #[error("{0} operation has nothing to run")]
    NoCommand(&'static str),

    /// The worker task died.
    #[error("operation worker failed: {0}")]
    Join(String),
}

/// Errors talking to the external signing agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent reported an error.
    #[error("agent error ({code:?}): {message}")]
    Agent {
        /// Error category.
        code: AgentErrorCode,
        /// Message from the agent.
        message: String,
    },

    /// The agent answered with something unexpected.
    #[error("agent protocol error: {0}")]
    Protocol(String),

    /// No agent command is configured.
    #[error("no signing agent configured")]
    NotConfigured,

    /// The signature did not arrive in time.
    #[error("timed out after {0:?} waiting for a signature")]
    Timeout(Duration),

    /// The signing request was abandoned.
    #[error("signing was cancelled")]
    Cancelled,

    /// I/O error talking to the agent process.
    #[error("agent IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Whether the error means the selected key is gone and must be reselected.
    pub fn is_key_lost(&self) -> bool {
        matches!(
            self,
            Self::Agent {
                code: AgentErrorCode::NoSuchKey | AgentErrorCode::NoAuthenticationKey,
                ..
            }
        )
    }
}

/// Errors from the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Invalid settings.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Agent negotiation failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Git failed outside an operation batch.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Operation could not be built or run.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Anything else: prompts, key files, settings storage.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
