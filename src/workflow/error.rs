//! Workflow error types

use super::WorkflowKind;
use crate::llm::LlmError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The generation service failed; fatal for the current turn
    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),

    /// Loading or creating the session state failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Structured output could not be decoded
    #[error("Malformed structured output: {0}")]
    MalformedOutput(String),

    /// The persisted turn history belongs to a different workflow
    #[error("Session state holds {found} turns, expected {expected}")]
    ShapeMismatch {
        expected: WorkflowKind,
        found: WorkflowKind,
    },
}
