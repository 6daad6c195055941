//! Persisted session state
//!
//! One `SessionState` exists per session. Turn history is a tagged union over
//! the per-workflow turn shapes, so a session can never mix shapes, and
//! workflow-private data is likewise tagged by workflow.

use super::{WorkflowError, WorkflowKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Default bound on clarification loops per question
pub const DEFAULT_MAX_FOLLOW_UPS: u32 = 3;

/// Open-ended workflows keep at most this many turns; older ones are dropped
pub const MAX_RETAINED_TURNS: usize = 200;

/// Session status as seen by the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Active,
    Finished,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: i64,
    pub block_id: i64,
    /// Question or assignment cursor; never decreases
    pub current_index: usize,
    /// Specification records supplied at creation
    pub questions: Vec<Value>,
    pub answers: Answers,
    pub follow_up_count: u32,
    pub max_follow_ups: u32,
    pub status: WorkflowStatus,
    pub custom_data: WorkflowData,
}

impl SessionState {
    pub fn new(
        session_id: i64,
        block_id: i64,
        kind: WorkflowKind,
        questions: Vec<Value>,
        max_follow_ups: u32,
    ) -> Self {
        Self {
            session_id,
            block_id,
            current_index: 0,
            questions,
            answers: Answers::empty(kind),
            follow_up_count: 0,
            max_follow_ups,
            status: WorkflowStatus::Active,
            custom_data: WorkflowData::None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == WorkflowStatus::Finished
    }

    /// Number of recorded turns, whatever their shape
    pub fn turn_count(&self) -> usize {
        self.answers.turn_count()
    }
}

// ============================================================================
// Turn records
// ============================================================================

/// Turn history, one variant per workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "turns", rename_all = "snake_case")]
pub enum Answers {
    Examination(Vec<ExamTurn>),
    Custom(Vec<CustomTurn>),
    FillGaps(Vec<AssignmentTurn>),
    Roleplay(Vec<RoleplayTurn>),
    Reflection(Vec<ReflectionTurn>),
    Analogous(Vec<AssignmentTurn>),
}

macro_rules! turn_accessors {
    ($($variant:ident, $turn:ty, $get:ident, $get_mut:ident;)*) => {
        impl Answers {
            $(
                pub fn $get(&self) -> Result<&Vec<$turn>, WorkflowError> {
                    match self {
                        Answers::$variant(turns) => Ok(turns),
                        other => Err(WorkflowError::ShapeMismatch {
                            expected: WorkflowKind::$variant,
                            found: other.kind(),
                        }),
                    }
                }

                pub fn $get_mut(&mut self) -> Result<&mut Vec<$turn>, WorkflowError> {
                    match self {
                        Answers::$variant(turns) => Ok(turns),
                        other => Err(WorkflowError::ShapeMismatch {
                            expected: WorkflowKind::$variant,
                            found: other.kind(),
                        }),
                    }
                }
            )*
        }
    };
}

turn_accessors! {
    Examination, ExamTurn, examination, examination_mut;
    Custom, CustomTurn, custom, custom_mut;
    FillGaps, AssignmentTurn, fill_gaps, fill_gaps_mut;
    Roleplay, RoleplayTurn, roleplay, roleplay_mut;
    Reflection, ReflectionTurn, reflection, reflection_mut;
    Analogous, AssignmentTurn, analogous, analogous_mut;
}

impl Answers {
    pub fn empty(kind: WorkflowKind) -> Self {
        match kind {
            WorkflowKind::Examination => Answers::Examination(Vec::new()),
            WorkflowKind::Custom => Answers::Custom(Vec::new()),
            WorkflowKind::FillGaps => Answers::FillGaps(Vec::new()),
            WorkflowKind::Roleplay => Answers::Roleplay(Vec::new()),
            WorkflowKind::Reflection => Answers::Reflection(Vec::new()),
            WorkflowKind::Analogous => Answers::Analogous(Vec::new()),
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        match self {
            Answers::Examination(_) => WorkflowKind::Examination,
            Answers::Custom(_) => WorkflowKind::Custom,
            Answers::FillGaps(_) => WorkflowKind::FillGaps,
            Answers::Roleplay(_) => WorkflowKind::Roleplay,
            Answers::Reflection(_) => WorkflowKind::Reflection,
            Answers::Analogous(_) => WorkflowKind::Analogous,
        }
    }

    pub fn turn_count(&self) -> usize {
        match self {
            Answers::Examination(t) => t.len(),
            Answers::Custom(t) => t.len(),
            Answers::FillGaps(t) | Answers::Analogous(t) => t.len(),
            Answers::Roleplay(t) => t.len(),
            Answers::Reflection(t) => t.len(),
        }
    }
}

/// Drop the oldest turns beyond [`MAX_RETAINED_TURNS`]
pub fn retain_recent<T>(turns: &mut Vec<T>) {
    if turns.len() > MAX_RETAINED_TURNS {
        let excess = turns.len() - MAX_RETAINED_TURNS;
        turns.drain(..excess);
    }
}

/// Judgement of one exam answer against the question's key concepts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnswerEvaluation {
    pub complete: bool,
    #[serde(default)]
    pub missing_concepts: Vec<String>,
    #[serde(default)]
    pub needs_clarification: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamTurn {
    pub question_index: usize,
    /// The learner's answer; empty while the question is open
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub evaluation: Option<AnswerEvaluation>,
}

impl ExamTurn {
    pub fn open(question_index: usize) -> Self {
        Self {
            question_index,
            answer: String::new(),
            timestamp: Utc::now(),
            evaluation: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.evaluation.as_ref().is_some_and(|e| e.complete)
    }
}

/// Grading of one submitted assignment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssignmentEvaluation {
    #[serde(alias = "all_correct")]
    pub correct: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub feedback: String,
}

impl AssignmentEvaluation {
    /// Learner-facing feedback block
    pub fn render_feedback(&self) -> String {
        if self.correct {
            return "✅ Excellent! All answers are correct.".to_string();
        }
        let mut parts = vec!["Let me check your answers:\n".to_string()];
        parts.extend(self.errors.iter().map(|e| format!("❌ {e}")));
        parts.push(format!("\n{}", self.feedback));
        parts.join("\n")
    }
}

/// Assignment record shared by FillGaps and Analogous
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentTurn {
    pub assignment_index: usize,
    pub assignment: String,
    /// The graded submission; empty until one arrives
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    pub graded: bool,
    pub waiting_for_answer: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub waiting_for_topic: bool,
    /// Latest non-graded message (question, acknowledgement, partial answer)
    pub user_message: String,
    pub tutor_response: String,
    #[serde(default)]
    pub evaluation: Option<AssignmentEvaluation>,
}

impl AssignmentTurn {
    /// Record for a freshly presented assignment
    pub fn open(assignment_index: usize, assignment: String) -> Self {
        Self {
            assignment_index,
            assignment,
            answer: String::new(),
            timestamp: Utc::now(),
            graded: false,
            waiting_for_answer: true,
            waiting_for_topic: false,
            user_message: String::new(),
            tutor_response: String::new(),
            evaluation: None,
        }
    }

    /// Record for the topic negotiation that precedes the first assignment
    pub fn topic_negotiation() -> Self {
        Self {
            waiting_for_answer: false,
            waiting_for_topic: true,
            ..Self::open(0, String::new())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleplayTurn {
    pub user_message: String,
    pub agent_response: String,
    /// 1-based turn number; survives trimming of older turns
    pub turn: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionTurn {
    pub user_message: String,
    pub coach_response: String,
    pub timestamp: DateTime<Utc>,
    pub phase: ReflectionPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTurn {
    pub user_message: String,
    pub assistant_response: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Workflow-private data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowData {
    #[default]
    None,
    Roleplay {
        #[serde(default)]
        progress_notes: Vec<String>,
    },
    Analogous {
        #[serde(default)]
        topic: String,
    },
    Reflection(ReflectionData),
}

/// Coaching phases in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionPhase {
    Aspiration,
    Strengths,
    FeedForward,
    Summary,
}

impl ReflectionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ReflectionPhase::Aspiration => "aspiration",
            ReflectionPhase::Strengths => "strengths",
            ReflectionPhase::FeedForward => "feed_forward",
            ReflectionPhase::Summary => "summary",
        }
    }
}

impl fmt::Display for ReflectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Responses collected during one coaching phase
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseNotes {
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReflectionData {
    #[serde(default)]
    pub phase: Option<ReflectionPhase>,
    #[serde(default)]
    pub aspiration: PhaseNotes,
    #[serde(default)]
    pub strengths: PhaseNotes,
    #[serde(default)]
    pub feed_forward: PhaseNotes,
}

impl ReflectionData {
    pub fn notes_mut(&mut self, phase: ReflectionPhase) -> Option<&mut PhaseNotes> {
        match phase {
            ReflectionPhase::Aspiration => Some(&mut self.aspiration),
            ReflectionPhase::Strengths => Some(&mut self.strengths),
            ReflectionPhase::FeedForward => Some(&mut self.feed_forward),
            ReflectionPhase::Summary => None,
        }
    }
}
