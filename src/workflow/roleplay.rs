//! In-character role-play
//!
//! The model plays a scenario role against the learner. There is no fixed
//! length: the session ends when the block's finish conditions are judged
//! satisfied after a turn.

use super::base::TurnContext;
use super::classifier::contains_any;
use super::evaluation::{
    generate_report, render_criteria, report_format, CriteriaStyle, EvaluationRequest,
    NO_COMPLETED_WORK,
};
use super::spec::SpecRecord;
use super::state::retain_recent;
use super::{RoleplayTurn, SessionState, Workflow, WorkflowData, WorkflowError, WorkflowKind};
use crate::llm::LlmRequest;
use crate::runtime::LlmClient;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;

const FINISHED_REPLY: &str = "Role-play завершено. Дякую за участь!";

const TEMPERATURE: f32 = 0.8;
const MAX_TOKENS: u32 = 1024;

/// Turns before any finish condition is considered
const MIN_TURNS: usize = 3;
const DEFAULT_MAX_TURNS: usize = 20;
const MAX_PROGRESS_NOTES: usize = 10;
const PROMPT_EXCERPT_CHARS: usize = 100;
const LOOP_PREFIX_CHARS: usize = 50;
/// Turns before a repeating agent counts as stuck
const LOOP_MIN_TURNS: usize = 5;

const PROGRESS_KEYWORDS: &[&str] = &[
    "чудово",
    "добре",
    "правильно",
    "згоден",
    "зрозумів",
    "наступний",
    "тепер",
    "переходимо",
    "good",
    "great",
    "correct",
    "next",
];

const COMPLETION_PHRASES: &[&str] = &[
    "завершено",
    "підсумок",
    "дякую за сесію",
    "це все",
    "completed",
    "finished",
    "that concludes",
    "thank you for",
    "на цьому завершуємо",
    "це завершує нашу розмову",
];

const CONFIRMATION_CUES: &[&str] = &["підтверд", "скаж", "фраз"];

const CONFIRMATION_WORDS: &[&str] = &[
    "зрозумів",
    "зрозуміла",
    "дякую",
    "так",
    "готов",
    "готова",
    "finished",
    "understood",
];

static TURN_LIMIT: OnceLock<Regex> = OnceLock::new();

fn turn_limit_pattern() -> &'static Regex {
    TURN_LIMIT.get_or_init(|| {
        Regex::new(r"(\d+)[–\-\s]*(хвилин|turns?|exchanges?)").expect("Invalid turn limit pattern")
    })
}

/// Turn limit stated in the finish conditions, e.g. "15 turns" or "10 хвилин"
pub fn max_turns(conditions: &str) -> usize {
    let lower = conditions.to_lowercase();
    let Some(caps) = turn_limit_pattern().captures(&lower) else {
        return DEFAULT_MAX_TURNS;
    };
    let Ok(number) = caps[1].parse::<usize>() else {
        return DEFAULT_MAX_TURNS;
    };
    if caps[2].contains("хвилин") {
        // Roughly two exchanges a minute
        number.saturating_mul(2).max(10)
    } else {
        number
    }
}

fn excerpt(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

/// Decide whether the role-play is over after the latest turn
pub fn should_finish(conditions: &str, turns: &[RoleplayTurn]) -> bool {
    if conditions.trim().is_empty() {
        return false;
    }
    let Some(latest) = turns.last() else {
        return false;
    };
    let turn_count = latest.turn;
    if turn_count < MIN_TURNS {
        return false;
    }

    if turn_count >= max_turns(conditions) {
        tracing::debug!(turn_count, "Role-play reached its turn limit");
        return true;
    }

    if contains_any(&latest.agent_response, COMPLETION_PHRASES) {
        tracing::debug!(turn_count, "Role-play agent used a completion phrase");
        return true;
    }

    let recent = &turns[turns.len().saturating_sub(3)..];

    let lower = conditions.to_lowercase();
    let wants_confirmation = (lower.contains("finished") || lower.contains("phrase"))
        && lower.contains("student")
        && contains_any(&lower, CONFIRMATION_CUES);
    if wants_confirmation
        && recent
            .iter()
            .any(|t| contains_any(&t.user_message, CONFIRMATION_WORDS))
    {
        tracing::debug!(turn_count, "Student confirmed the role-play is done");
        return true;
    }

    if turn_count >= LOOP_MIN_TURNS {
        let first = excerpt(&recent[0].agent_response, LOOP_PREFIX_CHARS);
        if recent
            .iter()
            .all(|t| excerpt(&t.agent_response, LOOP_PREFIX_CHARS) == first)
        {
            tracing::debug!(turn_count, "Role-play agent is repeating itself");
            return true;
        }
    }

    false
}

pub struct RoleplayWorkflow;

impl RoleplayWorkflow {
    fn prompt(state: &SessionState, turns: &[RoleplayTurn]) -> String {
        let spec = SpecRecord::first(&state.questions);
        let next_turn = turns.last().map_or(0, |t| t.turn) + 1;

        let mut recent = String::new();
        if !turns.is_empty() {
            recent.push_str("# Recent Conversation (last 3 turns)\n");
            for turn in &turns[turns.len().saturating_sub(3)..] {
                let _ = writeln!(
                    recent,
                    "Student: {}...",
                    excerpt(&turn.user_message, PROMPT_EXCERPT_CHARS)
                );
                let _ = writeln!(
                    recent,
                    "You: {}...\n",
                    excerpt(&turn.agent_response, PROMPT_EXCERPT_CHARS)
                );
            }
        }

        let mut progress = String::new();
        if let WorkflowData::Roleplay { progress_notes } = &state.custom_data {
            if !progress_notes.is_empty() {
                progress.push_str("# What has been accomplished:\n");
                for note in &progress_notes[progress_notes.len().saturating_sub(5)..] {
                    let _ = writeln!(progress, "- {note}");
                }
            }
        }

        format!(
            "You are participating in a role-play simulation.\n\n\
             # Your Role\n{}\n\n\
             # Student's Role\n{}\n\n\
             # Learning Goal\n{}\n\n\
             # Scenario Flow\n{}\n\n\
             # Behavior Rules\n{}\n\n\
             Current turn: {next_turn}\n\n\
             {recent}\n\
             {progress}\n\
             IMPORTANT INSTRUCTIONS:\n\
             1. Stay in character at all times\n\
             2. Respond naturally to the student's actions and words\n\
             3. DO NOT repeat the same question - if student answered, move forward in the scenario\n\
             4. Follow the scenario flow step by step\n\
             5. If student demonstrates understanding or completes a task, acknowledge it and move on\n\
             6. Avoid circular conversations - each turn should make progress\n\
             7. Do not break the fourth wall\n\n\
             CRITICAL: If you notice you're asking similar questions repeatedly, STOP and move \
             to the next stage of the scenario.",
            spec.text("role"),
            spec.text("student_role"),
            spec.text("goal"),
            spec.text("basic_scenario"),
            spec.text("behavior"),
        )
    }

    fn note_progress(state: &mut SessionState, turn: usize, response: &str) {
        if !contains_any(response, PROGRESS_KEYWORDS) {
            return;
        }
        if !matches!(state.custom_data, WorkflowData::Roleplay { .. }) {
            state.custom_data = WorkflowData::Roleplay {
                progress_notes: Vec::new(),
            };
        }
        if let WorkflowData::Roleplay { progress_notes } = &mut state.custom_data {
            progress_notes.push(format!("Turn {turn}: Progress made"));
            let excess = progress_notes.len().saturating_sub(MAX_PROGRESS_NOTES);
            progress_notes.drain(..excess);
        }
    }
}

#[async_trait]
impl Workflow for RoleplayWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Roleplay
    }

    async fn advance(&self, ctx: &TurnContext<'_>, message: &str) -> Result<String, WorkflowError> {
        let mut state = ctx.load_or_create(WorkflowKind::Roleplay).await?;

        if state.is_finished() {
            return Ok(ctx.reply(FINISHED_REPLY).await);
        }

        let prompt = Self::prompt(&state, state.answers.roleplay()?);
        let request = LlmRequest::with_instructions(prompt)
            .user_input(message)
            .temperature(TEMPERATURE)
            .max_tokens(MAX_TOKENS);
        let response = ctx.stream(request).await?;

        let turn = {
            let turns = state.answers.roleplay_mut()?;
            let turn = turns.last().map_or(0, |t| t.turn) + 1;
            turns.push(RoleplayTurn {
                user_message: message.to_string(),
                agent_response: response.clone(),
                turn,
                timestamp: Utc::now(),
            });
            retain_recent(turns);
            turn
        };
        Self::note_progress(&mut state, turn, &response);

        let conditions = SpecRecord::first(&state.questions).text("finish_dialogue_conditions");
        if should_finish(&conditions, state.answers.roleplay()?) {
            tracing::info!(
                session_id = ctx.session_id,
                workflow = "roleplay",
                turn,
                "Finish conditions met"
            );
            ctx.finish(&mut state).await;
        } else {
            ctx.persist(&state).await;
        }

        Ok(response)
    }

    async fn evaluate(
        &self,
        llm: &dyn LlmClient,
        request: &EvaluationRequest<'_>,
    ) -> Result<String, WorkflowError> {
        let state = request.state;
        let turns = state.answers.roleplay()?;
        if turns.is_empty() {
            return Ok(NO_COMPLETED_WORK.to_string());
        }

        let mut conversation = String::new();
        for turn in turns {
            let _ = writeln!(conversation, "\n### Turn {}", turn.turn);
            let _ = writeln!(conversation, "**Student:** {}", turn.user_message);
            let _ = writeln!(conversation, "**Agent:** {}\n", turn.agent_response);
        }

        let total_turns = turns.last().map_or(0, |t| t.turn);
        let document = format!(
            "{}\n\n\
             # Role-play Conversation\n{conversation}\n\
             # Evaluation Criteria\n{}\n\n\
             # Additional Context\n\
             Total turns: {total_turns}\n\
             Status: {}\n\n\
             # Your Task\n\n\
             Evaluate the student's performance in the role-play based on the criteria. \
             Consider both the quality of responses and whether the conversation progressed \
             naturally without getting stuck.\n\n\
             For each criterion review the conversation, assess how well the student met it, \
             assign a grade from 0 to its max points and give clear reasoning.\n\n{}",
            request.instructions,
            render_criteria(request.criteria, CriteriaStyle::Short),
            state.status,
            report_format(request.criteria, "Optional suggestions"),
        );

        generate_report(llm, request, document).await
    }
}
