//! Oral examination
//!
//! Questions are asked one at a time. Each answer is judged against the
//! question's key concepts; incomplete answers get up to `max_follow_ups`
//! clarifying questions before the exam moves on regardless.

use super::base::TurnContext;
use super::evaluation::{
    exchange_header, generate_report, render_criteria, report_format, CriteriaStyle,
    EvaluationRequest, NO_COMPLETED_WORK,
};
use super::{
    AnswerEvaluation, ExamTurn, SessionState, Workflow, WorkflowError, WorkflowKind,
};
use crate::llm::{LlmRequest, ResponseSchema};
use crate::runtime::LlmClient;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::fmt::Write;

const FINISHED_REPLY: &str = "Іспит вже завершено.";
const COMPLETED_REPLY: &str = "Вітаю! Ви відповіли на всі питання. Іспит завершено.";

const INTERVIEWER_TEMPERATURE: f32 = 0.7;
const INTERVIEWER_MAX_TOKENS: u32 = 512;
const EVALUATOR_TEMPERATURE: f32 = 0.2;
const EVALUATOR_MAX_TOKENS: u32 = 512;

pub struct ExaminationWorkflow;

fn question_field(question: Option<&Value>, key: &str) -> String {
    match question.and_then(|q| q.get(key)) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn answer_schema() -> ResponseSchema {
    ResponseSchema::new(
        "answer_evaluation",
        json!({
            "type": "object",
            "properties": {
                "complete": {"type": "boolean"},
                "missing_concepts": {"type": "array", "items": {"type": "string"}},
                "needs_clarification": {"type": "boolean"}
            },
            "required": ["complete", "missing_concepts", "needs_clarification"],
            "additionalProperties": false
        }),
    )
}

impl ExaminationWorkflow {
    /// Instructions for asking the current question, or a follow-up on it
    fn interviewer_prompt(state: &SessionState, last: Option<&ExamTurn>) -> String {
        let question = question_field(state.questions.get(state.current_index), "question");

        let is_follow_up = state.follow_up_count > 0
            && last
                .and_then(|t| t.evaluation.as_ref())
                .is_some_and(|e| e.needs_clarification);

        if is_follow_up {
            let previous = last.map(|t| t.answer.as_str()).unwrap_or_default();
            format!(
                "You are conducting an oral exam. The student gave a partial answer.\n\n\
                 Question: {question}\n\
                 Student's previous answer: {previous}\n\n\
                 Ask one natural follow-up question that invites the student to elaborate \
                 or clarify. Do not reveal the correct answer or any key concept. \
                 Prefer open phrasing such as \"Чи можете розповісти більше про...\".\n\n\
                 Speak in Ukrainian. Be supportive but neutral."
            )
        } else {
            format!(
                "You are an examiner conducting an oral exam.\n\n\
                 Current question: {question}\n\n\
                 Ask this question clearly and directly in Ukrainian. \
                 Do not give hints or reveal key concepts. Be professional and neutral."
            )
        }
    }

    fn evaluator_prompt(state: &SessionState, answer: &str) -> String {
        let question = state.questions.get(state.current_index);
        format!(
            "You are an evaluator for an oral examination.\n\n\
             QUESTION: {}\n\
             KEY CONCEPTS: {}\n\
             STUDENT ANSWER: {answer}\n\n\
             Judge whether the answer semantically covers the key concepts. Accept \
             synonyms, paraphrases and detailed explanations; judge meaning, not wording.\n\
             - Clearly wrong or irrelevant: complete=false, needs_clarification=false\n\
             - Partially addresses the topic: complete=false, needs_clarification=true\n\
             - Fully covers the key concepts: complete=true\n\n\
             Current follow-up count: {}/{}. If the count has reached the maximum, set \
             needs_clarification=false even if the answer is incomplete.",
            question_field(question, "question"),
            question_field(question, "key_concepts"),
            state.follow_up_count,
            state.max_follow_ups,
        )
    }

    async fn ask_current_question(
        ctx: &TurnContext<'_>,
        state: &mut SessionState,
    ) -> Result<String, WorkflowError> {
        let prompt = {
            let turns = state.answers.examination()?;
            Self::interviewer_prompt(state, turns.last())
        };
        let reply = ctx.generate(Self::interviewer_request(prompt)).await?;

        let index = state.current_index;
        state.answers.examination_mut()?.push(ExamTurn::open(index));
        state.follow_up_count = 0;
        ctx.persist(state).await;
        Ok(ctx.reply(reply).await)
    }

    fn interviewer_request(prompt: String) -> LlmRequest {
        LlmRequest::with_instructions(prompt)
            .temperature(INTERVIEWER_TEMPERATURE)
            .max_tokens(INTERVIEWER_MAX_TOKENS)
    }

    /// Move to the next question, finishing the exam after the last one
    async fn advance_question(
        ctx: &TurnContext<'_>,
        state: &mut SessionState,
        reason: &str,
    ) -> Result<String, WorkflowError> {
        state.current_index += 1;
        state.follow_up_count = 0;
        tracing::info!(
            session_id = ctx.session_id,
            workflow = "examination",
            question_index = state.current_index,
            reason,
            "Advancing to next question"
        );

        if state.current_index >= state.questions.len() {
            ctx.finish(state).await;
            return Ok(ctx.reply(COMPLETED_REPLY).await);
        }

        ctx.persist(state).await;
        Self::ask_current_question(ctx, state).await
    }
}

#[async_trait]
impl Workflow for ExaminationWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Examination
    }

    async fn advance(&self, ctx: &TurnContext<'_>, message: &str) -> Result<String, WorkflowError> {
        let mut state = ctx.load_or_create(WorkflowKind::Examination).await?;

        if state.is_finished() {
            return Ok(ctx.reply(FINISHED_REPLY).await);
        }

        if state.current_index >= state.questions.len() {
            ctx.finish(&mut state).await;
            return Ok(ctx.reply(COMPLETED_REPLY).await);
        }

        let awaiting_answer = state
            .answers
            .examination()?
            .last()
            .is_some_and(|t| !t.is_complete());
        if !awaiting_answer {
            return Self::ask_current_question(ctx, &mut state).await;
        }

        let evaluation: AnswerEvaluation = {
            let prompt = Self::evaluator_prompt(&state, message);
            let request = LlmRequest::with_instructions(prompt)
                .temperature(EVALUATOR_TEMPERATURE)
                .max_tokens(EVALUATOR_MAX_TOKENS);
            ctx.generate_structured(request, answer_schema()).await?
        };

        tracing::info!(
            session_id = ctx.session_id,
            workflow = "examination",
            question_index = state.current_index,
            complete = evaluation.complete,
            needs_clarification = evaluation.needs_clarification,
            follow_ups = state.follow_up_count,
            "Answer evaluated"
        );

        let complete = evaluation.complete;
        if let Some(turn) = state.answers.examination_mut()?.last_mut() {
            turn.answer = message.to_string();
            turn.timestamp = Utc::now();
            turn.evaluation = Some(evaluation);
        }

        if complete {
            return Self::advance_question(ctx, &mut state, "complete").await;
        }
        if state.follow_up_count >= state.max_follow_ups {
            return Self::advance_question(ctx, &mut state, "follow_up_budget_exhausted").await;
        }

        state.follow_up_count += 1;
        ctx.persist(&state).await;

        let prompt = {
            let turns = state.answers.examination()?;
            Self::interviewer_prompt(&state, turns.last())
        };
        let reply = ctx.generate(Self::interviewer_request(prompt)).await?;
        Ok(ctx.reply(reply).await)
    }

    async fn evaluate(
        &self,
        llm: &dyn LlmClient,
        request: &EvaluationRequest<'_>,
    ) -> Result<String, WorkflowError> {
        let state = request.state;
        let turns = state.answers.examination()?;
        if turns.iter().all(|t| t.answer.trim().is_empty()) {
            return Ok(NO_COMPLETED_WORK.to_string());
        }

        let mut history = String::new();
        for (i, turn) in turns.iter().enumerate() {
            let Some(question) = state.questions.get(turn.question_index) else {
                continue;
            };
            exchange_header(&mut history, &format!("Exchange {}", i + 1));
            let _ = writeln!(
                history,
                "**Question:** {}",
                question_field(Some(question), "question")
            );
            let _ = writeln!(
                history,
                "**Expected key concepts:** {}\n",
                question_field(Some(question), "key_concepts")
            );
            let answer = if turn.answer.is_empty() {
                "No answer provided"
            } else {
                &turn.answer
            };
            let _ = writeln!(history, "**Student answer:** {answer}\n");

            if let Some(eval) = &turn.evaluation {
                let _ = writeln!(history, "**Workflow evaluation:**");
                let _ = writeln!(history, "  - Answer was complete: {}", eval.complete);
                if !eval.missing_concepts.is_empty() {
                    let _ = writeln!(
                        history,
                        "  - Missing concepts: {}",
                        eval.missing_concepts.join(", ")
                    );
                }
                if eval.needs_clarification {
                    let _ = writeln!(history, "  - Needed clarification: true");
                }
            }
            history.push('\n');
        }

        let document = format!(
            "You are an evaluation assistant for an educational platform.\n\n\
             {}\n\n\
             # Conversation History\n{history}\n\n\
             # Evaluation Criteria\n{}\n\n\
             # Your Task\n\n\
             Evaluate the student's performance according to the provided criteria. For \
             each criterion review the answers and the workflow evaluation results, assess \
             how well the criterion was met, assign a grade from 0 to its max points and \
             give clear reasoning.\n\n{}",
            request.instructions,
            render_criteria(request.criteria, CriteriaStyle::Plain),
            report_format(request.criteria, "Optional suggestions for improvement"),
        );

        generate_report(llm, request, document).await
    }
}
