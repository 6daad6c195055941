//! Free-form assistant driven by block instructions

use super::base::TurnContext;
use super::evaluation::{
    exchange_header, generate_report, render_criteria, report_format, CriteriaStyle,
    EvaluationRequest, NO_COMPLETED_WORK,
};
use super::state::retain_recent;
use super::{CustomTurn, Workflow, WorkflowError, WorkflowKind};
use crate::llm::LlmRequest;
use crate::runtime::LlmClient;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::fmt::Write;

const FINISHED_REPLY: &str = "Чат завершено.";

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1024;

pub struct CustomWorkflow;

/// Render specification records as `key: value` lines
fn render_specifications(specs: &[Value]) -> String {
    if specs.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\n# Specifications:\n");
    for spec in specs {
        match spec {
            Value::Object(fields) => {
                for (key, value) in fields {
                    match value {
                        Value::String(s) => {
                            let _ = writeln!(out, "{key}: {s}");
                        }
                        other => {
                            let _ = writeln!(out, "{key}: {other}");
                        }
                    }
                }
            }
            Value::String(s) => {
                let _ = writeln!(out, "{s}");
            }
            other => {
                let _ = writeln!(out, "{other}");
            }
        }
    }
    out
}

fn conversation_history(turns: &[CustomTurn]) -> String {
    if turns.is_empty() {
        return String::new();
    }
    let mut out = String::from("# CONVERSATION HISTORY (what has already been discussed):\n");
    for (i, turn) in turns.iter().enumerate() {
        let _ = writeln!(out, "\nTurn {}:", i + 1);
        let _ = writeln!(out, "Student: {}", turn.user_message);
        let _ = writeln!(out, "You: {}", turn.assistant_response);
    }
    out.push_str(
        "\n\nIMPORTANT: Review this conversation history carefully. DO NOT repeat questions or \
         topics already covered. Move forward naturally based on what the student already \
         knows.\n",
    );
    out
}

fn prompt(instructions: &str, specs: &[Value], turns: &[CustomTurn]) -> String {
    format!(
        "{instructions}{}\n\n{}\n\n\
         Remember:\n\
         - Be flexible and conversational, not rigid\n\
         - If the student says they understand or want to move on, progress to the next topic\n\
         - Avoid repeating the same questions\n\
         - Keep responses natural and engaging\n\
         - Follow the student's pace",
        render_specifications(specs),
        conversation_history(turns),
    )
}

#[async_trait]
impl Workflow for CustomWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Custom
    }

    async fn advance(&self, ctx: &TurnContext<'_>, message: &str) -> Result<String, WorkflowError> {
        let mut state = ctx.load_or_create(WorkflowKind::Custom).await?;

        if state.is_finished() {
            return Ok(ctx.reply(FINISHED_REPLY).await);
        }

        let instructions = ctx.block.instructions.as_deref().unwrap_or_default();
        let request = LlmRequest::with_instructions(prompt(
            instructions,
            &state.questions,
            state.answers.custom()?,
        ))
        .user_input(message)
        .temperature(TEMPERATURE)
        .max_tokens(MAX_TOKENS);
        let response = ctx.generate(request).await?;

        let turns = state.answers.custom_mut()?;
        turns.push(CustomTurn {
            user_message: message.to_string(),
            assistant_response: response.clone(),
            timestamp: Utc::now(),
        });
        retain_recent(turns);
        ctx.persist(&state).await;

        Ok(ctx.reply(response).await)
    }

    async fn evaluate(
        &self,
        llm: &dyn LlmClient,
        request: &EvaluationRequest<'_>,
    ) -> Result<String, WorkflowError> {
        let turns = request.state.answers.custom()?;
        if turns.is_empty() {
            return Ok(NO_COMPLETED_WORK.to_string());
        }

        let mut conversation = String::new();
        for (i, turn) in turns.iter().enumerate() {
            exchange_header(&mut conversation, &format!("Exchange {}", i + 1));
            let _ = writeln!(conversation, "**User:** {}\n", turn.user_message);
            let _ = writeln!(conversation, "**Assistant:** {}\n", turn.assistant_response);
        }

        let document = format!(
            "{}\n\n\
             # Conversation History\n{conversation}\n\n\
             # Evaluation Criteria\n{}\n\n\
             # Your Task\n\n\
             Evaluate the conversation according to the provided criteria. For each criterion \
             review the conversation, assess how well it was met, assign a grade from 0 to its \
             max points and give clear reasoning.\n\n{}",
            request.instructions,
            render_criteria(request.criteria, CriteriaStyle::Short),
            report_format(request.criteria, "Optional suggestions"),
        );

        generate_report(llm, request, document).await
    }
}
