//! Runtime for tutoring sessions
//!
//! Resolves the workflow for a session's block, serialises turns per
//! session, and records message pairs and evaluation results.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{EvaluationOutcome, SessionRuntime};
pub use traits::*;

use crate::workflow::WorkflowError;
use thiserror::Error;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = SessionRuntime<DatabaseStorage, RegistryLlmClient>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Session not found: {0}")]
    SessionNotFound(i64),
    #[error("Block not found: {0}")]
    BlockNotFound(i64),
    #[error("No workflow state found for session {0}")]
    StateNotFound(i64),
    #[error("No workflow found for template {0}")]
    UnknownTemplate(i64),
    #[error("No evaluation instructions configured")]
    MissingEvalInstructions,
    #[error("No evaluation criteria configured")]
    MissingCriteria,
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl RuntimeError {
    /// Request was rejected because of block configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RuntimeError::UnknownTemplate(_)
                | RuntimeError::MissingEvalInstructions
                | RuntimeError::MissingCriteria
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RuntimeError::SessionNotFound(_)
                | RuntimeError::BlockNotFound(_)
                | RuntimeError::StateNotFound(_)
        )
    }
}
