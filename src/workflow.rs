//! Tutoring workflow engine
//!
//! Six conversation protocols share one contract: load or create the
//! session's state, advance it by one learner message (calling the
//! generation service zero to two times), persist it, and on demand produce
//! a markdown evaluation report for the whole session.

mod analogous;
mod base;
mod classifier;
mod custom;
mod error;
mod evaluation;
mod examination;
mod fill_gaps;
mod reflection;
mod registry;
mod roleplay;
mod score;
mod spec;
mod state;

#[cfg(test)]
mod proptests;
#[cfg(test)]
mod scenarios;

pub use base::{ReplySink, TurnContext};
pub use error::WorkflowError;
pub use evaluation::EvaluationRequest;
pub use registry::WorkflowRegistry;
pub use score::extract_score;
pub use spec::{parse_criteria, parse_specifications, total_points, Criterion};
pub use state::*;

use crate::runtime::LlmClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The six conversation protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Examination,
    Custom,
    FillGaps,
    Roleplay,
    Reflection,
    Analogous,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 6] = [
        WorkflowKind::Examination,
        WorkflowKind::Custom,
        WorkflowKind::FillGaps,
        WorkflowKind::Roleplay,
        WorkflowKind::Reflection,
        WorkflowKind::Analogous,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::Examination => "examination",
            WorkflowKind::Custom => "custom",
            WorkflowKind::FillGaps => "fill_gaps",
            WorkflowKind::Roleplay => "roleplay",
            WorkflowKind::Reflection => "reflection",
            WorkflowKind::Analogous => "analogous",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown workflow kind: {s}"))
    }
}

/// A stateful conversation protocol
#[async_trait]
pub trait Workflow: Send + Sync {
    fn kind(&self) -> WorkflowKind;

    /// Advance the session by one learner message and return the full reply.
    /// Reply text is also pushed through `ctx.sink` as it becomes available.
    async fn advance(&self, ctx: &TurnContext<'_>, message: &str) -> Result<String, WorkflowError>;

    /// Produce the evaluation report for a session
    async fn evaluate(
        &self,
        llm: &dyn LlmClient,
        request: &EvaluationRequest<'_>,
    ) -> Result<String, WorkflowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("examination".parse(), Ok(WorkflowKind::Examination));
        assert_eq!("Fill-Gaps".parse(), Ok(WorkflowKind::FillGaps));
        assert_eq!(" roleplay ".parse(), Ok(WorkflowKind::Roleplay));
        assert!("quiz".parse::<WorkflowKind>().is_err());
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in WorkflowKind::ALL {
            assert_eq!(kind.as_str().parse(), Ok(kind));
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }
}
