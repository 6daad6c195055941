//! Evaluation report assembly
//!
//! Each workflow renders its own history section; this module adds the
//! criteria, the report format contract and the single generation call.

use super::spec::{format_points, total_points};
use super::{AssignmentTurn, Criterion, SessionState, WorkflowError};
use crate::llm::LlmRequest;
use crate::runtime::LlmClient;
use std::fmt::Write;

/// Reply when there is nothing to grade yet
pub const NO_COMPLETED_WORK: &str =
    "No completed assignments found. The student hasn't provided any answers yet.";

const REPORT_TEMPERATURE: f32 = 0.3;
const REPORT_MAX_TOKENS: u32 = 2048;

/// Inputs for one evaluation run
pub struct EvaluationRequest<'a> {
    pub session_id: i64,
    pub state: &'a SessionState,
    pub instructions: &'a str,
    pub criteria: &'a [Criterion],
    pub model: &'a str,
}

/// How criteria labels are rendered in the report context
#[derive(Debug, Clone, Copy)]
pub enum CriteriaStyle {
    /// `**Max Points:** 5` with bold labels
    Bold,
    /// `Max Points: 5` with long instruction labels
    Plain,
    /// `Max Points: 5` with `Summary:` / `Grading:` labels
    Short,
}

pub fn render_criteria(criteria: &[Criterion], style: CriteriaStyle) -> String {
    let mut out = String::new();
    for (i, crit) in criteria.iter().enumerate() {
        let _ = write!(out, "\n## Criterion {}", i + 1);
        if !crit.name.is_empty() {
            let _ = write!(out, ": {}", crit.name);
        }
        let points = format_points(crit.max_points);
        let (max, summary, grading) = match style {
            CriteriaStyle::Bold => (
                "**Max Points:**",
                "**Summary Instructions:**",
                "**Grading Instructions:**",
            ),
            CriteriaStyle::Plain => ("Max Points:", "Summary Instructions:", "Grading Instructions:"),
            CriteriaStyle::Short => ("Max Points:", "Summary:", "Grading:"),
        };
        let _ = writeln!(out, "\n{max} {points}");
        if !crit.summary_instructions.is_empty() {
            let _ = writeln!(out, "{summary} {}", crit.summary_instructions);
        }
        if !crit.grading_instructions.is_empty() {
            let _ = writeln!(out, "{grading} {}", crit.grading_instructions);
        }
        if !matches!(style, CriteriaStyle::Bold) {
            out.push('\n');
        }
    }
    out
}

/// The markdown report layout the grader must follow
pub fn report_format(criteria: &[Criterion], recommendations: &str) -> String {
    let total = format_points(total_points(criteria));
    format!(
        "Format your response as:\n\n\
         # Evaluation Report\n\n\
         ## Criterion 1: [Name]\n\
         **Assessment:** [Detailed assessment]\n\
         **Grade:** X/Y points\n\
         **Reasoning:** [Why this grade was assigned]\n\n\
         ## Criterion 2: [Name]\n\
         **Assessment:** [Detailed assessment]\n\
         **Grade:** X/Y points\n\
         **Reasoning:** [Explanation]\n\n\
         # Summary\n\
         **Total Score:** X/{total} points\n\
         **Overall Performance:** [Brief summary]\n\
         **Recommendations:** [{recommendations}]"
    )
}

/// Separator block used by exchange-style histories
pub fn exchange_header(out: &mut String, label: &str) {
    let rule = "=".repeat(60);
    let _ = write!(out, "\n{rule}\n{label}:\n{rule}\n\n");
}

/// Running statistics for graded-assignment workflows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignmentStats {
    pub completed: usize,
    pub correct: usize,
}

impl AssignmentStats {
    /// Share of completed assignments answered fully correctly, in percent
    pub fn accuracy_percent(self) -> f64 {
        if self.completed == 0 {
            return 0.0;
        }
        let correct = u32::try_from(self.correct).unwrap_or(u32::MAX);
        let completed = u32::try_from(self.completed).unwrap_or(u32::MAX);
        f64::from(correct) / f64::from(completed) * 100.0
    }

    pub fn render(self) -> String {
        format!(
            "# Summary Statistics\n\
             - Total assignments completed: {}\n\
             - Assignments with all correct answers: {}\n\
             - Accuracy rate: {:.1}%",
            self.completed,
            self.correct,
            self.accuracy_percent()
        )
    }
}

/// Issue the single report generation call and return the trimmed text
pub async fn generate_report(
    llm: &dyn LlmClient,
    request: &EvaluationRequest<'_>,
    document: String,
) -> Result<String, WorkflowError> {
    let llm_request = LlmRequest::with_instructions(document)
        .model(request.model)
        .temperature(REPORT_TEMPERATURE)
        .max_tokens(REPORT_MAX_TOKENS);

    let response = llm.complete(&llm_request).await?;
    tracing::info!(
        session_id = request.session_id,
        workflow = %request.state.answers.kind(),
        criteria = request.criteria.len(),
        "Evaluation report generated"
    );
    Ok(response.text.trim().to_string())
}

/// Render submitted assignments and tally their grades
pub fn assignment_history(turns: &[AssignmentTurn]) -> (String, AssignmentStats) {
    let mut stats = AssignmentStats::default();
    let mut history = String::new();
    for turn in turns.iter().filter(|t| !t.answer.is_empty()) {
        stats.completed += 1;
        exchange_header(
            &mut history,
            &format!("Assignment {}", turn.assignment_index + 1),
        );
        let _ = writeln!(history, "**Task:** {}\n", turn.assignment);
        let _ = writeln!(history, "**Student Answer:** {}\n", turn.answer);

        match &turn.evaluation {
            Some(eval) => {
                if eval.correct {
                    stats.correct += 1;
                    let _ = writeln!(history, "**Result:** ✅ All correct");
                } else {
                    let _ = writeln!(history, "**Result:** ❌ Has errors");
                    if !eval.errors.is_empty() {
                        let _ = writeln!(history, "**Errors:**");
                        for error in &eval.errors {
                            let _ = writeln!(history, "  - {error}");
                        }
                    }
                }
                if !eval.feedback.is_empty() {
                    let _ = writeln!(history, "**Feedback:** {}", eval.feedback);
                }
            }
            None => {
                let _ = writeln!(history, "**Result:** ⚠️ Not yet evaluated");
            }
        }
        history.push('\n');
    }
    (history, stats)
}

/// Report for workflows made of graded assignments
pub async fn evaluate_assignments(
    llm: &dyn LlmClient,
    request: &EvaluationRequest<'_>,
    turns: &[AssignmentTurn],
) -> Result<String, WorkflowError> {
    let (history, stats) = assignment_history(turns);
    if stats.completed == 0 {
        return Ok(NO_COMPLETED_WORK.to_string());
    }

    let document = format!(
        "{}\n\n{}\n\n\
         # Completed Assignments\n{history}\n\n\
         # Evaluation Criteria\n{}\n\n\
         # Your Task\n\
         Based on the assignments above and the evaluation criteria, provide a \
         comprehensive evaluation of the student's English performance.\n\n\
         Focus on:\n\
         1. Grammar accuracy\n\
         2. Vocabulary usage\n\
         3. Understanding of the learning goal\n\
         4. Overall progress and patterns in errors\n\n\
         For each criterion review the assignments, assess how well the student met it, \
         assign a grade from 0 to its max points and give clear reasoning with specific \
         examples.\n\n{}",
        request.instructions,
        stats.render(),
        render_criteria(request.criteria, CriteriaStyle::Bold),
        report_format(request.criteria, "Optional suggestions"),
    );

    generate_report(llm, request, document).await
}
