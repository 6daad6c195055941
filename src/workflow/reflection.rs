//! Reflection coaching (aspiration, strengths, feed-forward)
//!
//! The coach walks the learner through three phases and closes with a
//! summary. Phase changes are detected from signal phrases the coach is told
//! to use; because that signal is unreliable, a timebox and an explicit stop
//! request also force the summary.

use super::base::TurnContext;
use super::classifier::contains_any;
use super::evaluation::{
    generate_report, render_criteria, report_format, CriteriaStyle, EvaluationRequest,
    NO_COMPLETED_WORK,
};
use super::spec::SpecRecord;
use super::state::retain_recent;
use super::{
    PhaseNotes, ReflectionData, ReflectionPhase, ReflectionTurn, SessionState, Workflow,
    WorkflowData, WorkflowError, WorkflowKind, WorkflowStatus,
};
use crate::llm::LlmRequest;
use crate::runtime::LlmClient;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::fmt::Write;

const FINISHED_REPLY: &str = "Reflection session завершено. Дякую!";

const DEFAULT_GOAL: &str = "Провести reflection сесію";
const DEFAULT_TIMEBOX: &str = "10 хвилин";

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 512;

const HISTORY_WINDOW: usize = 10;

const STOP_PHRASES: &[&str] = &["завершуй", "закінчи"];

pub struct ReflectionWorkflow;

/// Coaching configuration from the block's first specification record
struct CoachSpec {
    goal: String,
    norms: String,
    timebox: String,
    asf: Value,
    constraints: String,
    start_template: String,
    summary_template: String,
}

impl CoachSpec {
    fn from_state(state: &SessionState) -> Self {
        let spec = SpecRecord::first(&state.questions);
        let asf = match spec.value("asf") {
            Some(Value::String(text)) => serde_json::from_str(text).unwrap_or(Value::Null),
            Some(other) => other.clone(),
            None => Value::Null,
        };
        Self {
            goal: spec.text_or("goal", DEFAULT_GOAL),
            norms: spec.text("norms"),
            timebox: spec.text("timebox"),
            asf,
            constraints: spec.text("constraints"),
            start_template: spec.text("start_template"),
            summary_template: spec.text("summary_template"),
        }
    }

    /// Question guide for a phase, with a generic fallback
    fn guide(&self, key: &str, fallback: &str) -> String {
        match self.asf.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::Null | Value::String(_)) | None => fallback.to_string(),
            Some(other) => other.to_string(),
        }
    }

    fn timebox_or_default(&self) -> &str {
        if self.timebox.is_empty() {
            DEFAULT_TIMEBOX
        } else {
            &self.timebox
        }
    }
}

fn collected(notes: &PhaseNotes) -> String {
    serde_json::to_string_pretty(notes).unwrap_or_default()
}

fn history(turns: &[ReflectionTurn]) -> String {
    let mut out = String::new();
    let window = &turns[turns.len().saturating_sub(HISTORY_WINDOW)..];
    for (i, turn) in window.iter().enumerate() {
        let _ = writeln!(out, "\nTurn {} [{}]:", i + 1, turn.phase);
        let _ = writeln!(out, "Coachee: {}", turn.user_message);
        let _ = writeln!(out, "Coach: {}", turn.coach_response);
    }
    out
}

fn opening_prompt(spec: &CoachSpec) -> String {
    format!(
        "You are a reflection coach conducting an ASF session.\n\n\
         # Your Opening Message\n{}\n\n\
         # Session Goal\n{}\n\n\
         # Norms\n{}\n\n\
         # Timebox\n{}\n\n\
         # Constraints\n{}\n\n\
         IMPORTANT: Your first response MUST use the exact text from \"Your Opening Message\" \
         above, then ask the first Aspiration question about self-attention. Max 120 words total.",
        spec.start_template,
        spec.goal,
        spec.norms,
        spec.timebox_or_default(),
        spec.constraints,
    )
}

fn phase_prompt(
    spec: &CoachSpec,
    data: &ReflectionData,
    phase: ReflectionPhase,
    turns: &[ReflectionTurn],
) -> String {
    let history = history(turns);
    let goal = &spec.goal;
    let constraints = &spec.constraints;
    match phase {
        ReflectionPhase::Aspiration => format!(
            "# Aspiration Phase\n\n\
             # Previous Conversation\n{history}\n\n\
             # Goal\n{goal}\n\n\
             # Aspiration Questions/Guide\n{}\n\n\
             # Collected So Far\n{}\n\n\
             # Your Task\n\
             - Ask ONE question at a time (max 120 words)\n\
             - After each response, provide a brief bullet summary (2-5 points)\n\
             - Push for specifics: dates, metrics, concrete examples\n\
             - DO NOT move to next phase until you have a clear aspiration statement, a time \
             horizon and core motivators with \"why\"\n\n\
             # Constraints\n{constraints}\n\n\
             If you have collected enough for Aspiration, signal by saying: \
             \"Чудово! Тепер перейдемо до ваших сильних сторін.\"",
            spec.guide("aspiration_questions", "Запитайте про аспірацію"),
            collected(&data.aspiration),
        ),
        ReflectionPhase::Strengths => format!(
            "# Strengths Phase\n\n\
             # Previous Conversation\n{history}\n\n\
             # Goal\n{goal}\n\n\
             # Aspiration (completed)\n{}\n\n\
             # Strengths Questions/Guide\n{}\n\n\
             # Collected So Far\n{}\n\n\
             # Your Task\n\
             - Ask about their strengths, values, past successes\n\
             - Collect 1-2 concrete examples (STAR format if possible)\n\
             - Identify potential overuse risks\n\
             - Suggest concrete guardrails\n\
             - One question at a time (max 120 words)\n\n\
             # Constraints\n{constraints}\n\n\
             If you have collected enough (2+ strengths with examples + overuse risks), signal \
             by saying: \"Відмінно! Тепер давайте визначимо конкретні наступні кроки.\"",
            collected(&data.aspiration),
            spec.guide("strengths_questions", "Запитайте про сильні сторони"),
            collected(&data.strengths),
        ),
        ReflectionPhase::FeedForward => format!(
            "# Feed-forward Phase\n\n\
             # Previous Conversation\n{history}\n\n\
             # Goal\n{goal}\n\n\
             # Aspiration\n{}\n\n\
             # Strengths\n{}\n\n\
             # Feed-forward Questions/Guide\n{}\n\n\
             # Collected So Far\n{}\n\n\
             # Your Task\n\
             - Help commit to ONE concrete next step\n\
             - Define: action + deadline + metric\n\
             - Create if-then plan (trigger → alternative)\n\
             - Set up accountability (person/event/reminder)\n\
             - Max 120 words\n\n\
             # Constraints\n{constraints}\n\n\
             Once you have one keystone action with deadline and metric, an if-then plan and an \
             accountability mechanism, signal completion by saying: \
             \"Дякую за продуктивну сесію! Зараз підготую підсумок.\"",
            collected(&data.aspiration),
            collected(&data.strengths),
            spec.guide("feed_forward_questions", "Запитайте про наступні кроки"),
            collected(&data.feed_forward),
        ),
        ReflectionPhase::Summary => format!(
            "Prepare the final Reflection Canvas summary.\n\n\
             # Session Data\n\
             ## Aspiration\n{}\n\n\
             ## Strengths\n{}\n\n\
             ## Feed-forward\n{}\n\n\
             # Summary Template\n{}\n\n\
             Fill the template with collected data. Be concise and structured.",
            collected(&data.aspiration),
            collected(&data.strengths),
            collected(&data.feed_forward),
            spec.summary_template,
        ),
    }
}

/// Whether the coach's reply signals the end of `phase`
fn signals_completion(phase: ReflectionPhase, response: &str) -> bool {
    let lower = response.to_lowercase();
    match phase {
        ReflectionPhase::Aspiration => {
            lower.contains("перейдемо до") && lower.contains("сильних сторін")
        }
        ReflectionPhase::Strengths => {
            lower.contains("наступні кроки") || lower.contains("визначимо конкретні")
        }
        ReflectionPhase::FeedForward => {
            lower.contains("підсумок") || lower.contains("продуктивну сесію")
        }
        ReflectionPhase::Summary => false,
    }
}

fn next_phase(phase: ReflectionPhase) -> ReflectionPhase {
    match phase {
        ReflectionPhase::Aspiration => ReflectionPhase::Strengths,
        ReflectionPhase::Strengths => ReflectionPhase::FeedForward,
        ReflectionPhase::FeedForward | ReflectionPhase::Summary => ReflectionPhase::Summary,
    }
}

/// Timebox fallback: long sessions are pushed to the summary
fn timebox_expired(timebox: &str, turns: usize) -> bool {
    (timebox.contains("10") && turns >= 8) || (timebox.contains("20") && turns >= 15)
}

/// What moved the session between phases, for the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    SignalPhrase,
    Timebox,
    StopPhrase,
}

/// Apply the outcome of one turn to the phase data.
///
/// `phase` is the phase the turn was held in. Returns the transition taken,
/// if any; finishing from the summary phase is reported through `status`.
fn update_phase(
    data: &mut ReflectionData,
    status: &mut WorkflowStatus,
    phase: ReflectionPhase,
    message: &str,
    response: &str,
    timebox: &str,
    turns: usize,
) -> Option<(ReflectionPhase, Trigger)> {
    let mut transition = None;

    if phase == ReflectionPhase::Summary {
        *status = WorkflowStatus::Finished;
    } else if let Some(notes) = data.notes_mut(phase) {
        if !message.is_empty() {
            notes.responses.push(message.to_string());
        }
        if signals_completion(phase, response) {
            notes.completed = true;
            let next = next_phase(phase);
            data.phase = Some(next);
            transition = Some((next, Trigger::SignalPhrase));
        }
    }

    if phase != ReflectionPhase::Summary && timebox_expired(timebox, turns) {
        data.phase = Some(ReflectionPhase::Summary);
        transition = Some((ReflectionPhase::Summary, Trigger::Timebox));
    }

    if contains_any(message, STOP_PHRASES) {
        data.phase = Some(ReflectionPhase::Summary);
        transition = Some((ReflectionPhase::Summary, Trigger::StopPhrase));
    }

    transition
}

#[async_trait]
impl Workflow for ReflectionWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Reflection
    }

    async fn advance(&self, ctx: &TurnContext<'_>, message: &str) -> Result<String, WorkflowError> {
        let mut state = ctx.load_or_create(WorkflowKind::Reflection).await?;

        if state.is_finished() {
            return Ok(ctx.reply(FINISHED_REPLY).await);
        }

        let mut data = match std::mem::take(&mut state.custom_data) {
            WorkflowData::Reflection(data) => data,
            _ => ReflectionData::default(),
        };
        let phase = *data.phase.get_or_insert(ReflectionPhase::Aspiration);

        let spec = CoachSpec::from_state(&state);
        let prompt = {
            let turns = state.answers.reflection()?;
            if turns.is_empty() {
                opening_prompt(&spec)
            } else {
                phase_prompt(&spec, &data, phase, turns)
            }
        };

        let request = LlmRequest::with_instructions(prompt)
            .user_input(message)
            .temperature(TEMPERATURE)
            .max_tokens(MAX_TOKENS);
        let response = ctx.stream(request).await?;

        let turn_count = {
            let turns = state.answers.reflection_mut()?;
            turns.push(ReflectionTurn {
                user_message: message.to_string(),
                coach_response: response.clone(),
                timestamp: Utc::now(),
                phase,
            });
            retain_recent(turns);
            turns.len()
        };

        let transition = update_phase(
            &mut data,
            &mut state.status,
            phase,
            message,
            &response,
            &spec.timebox,
            turn_count,
        );
        if let Some((to, trigger)) = transition {
            tracing::info!(
                session_id = ctx.session_id,
                workflow = "reflection",
                from = %phase,
                to = %to,
                ?trigger,
                "Phase transition"
            );
        }
        state.custom_data = WorkflowData::Reflection(data);

        if state.is_finished() {
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
        let turns = state.answers.reflection()?;
        if turns.is_empty() {
            return Ok(NO_COMPLETED_WORK.to_string());
        }

        let mut conversation = String::new();
        for (i, turn) in turns.iter().enumerate() {
            let _ = writeln!(
                conversation,
                "\n### Turn {} [{}]",
                i + 1,
                turn.phase.as_str().to_uppercase()
            );
            let _ = writeln!(conversation, "**Coachee:** {}", turn.user_message);
            let _ = writeln!(conversation, "**Coach:** {}\n", turn.coach_response);
        }

        let data = match &state.custom_data {
            WorkflowData::Reflection(data) => data.clone(),
            _ => ReflectionData::default(),
        };
        let document = format!(
            "{}\n\n\
             # Reflection Session Conversation\n{conversation}\n\
             # Collected Data\n\
             ## Aspiration\n{}\n\n\
             ## Strengths\n{}\n\n\
             ## Feed-forward\n{}\n\n\
             # Evaluation Criteria\n{}\n\n\
             # Your Task\n\n\
             Evaluate the coachee's engagement and the quality of their reflection based on \
             the criteria. For each criterion review the session, assess how well it was met, \
             assign a grade from 0 to its max points and give clear reasoning.\n\n{}",
            request.instructions,
            collected(&data.aspiration),
            collected(&data.strengths),
            collected(&data.feed_forward),
            render_criteria(request.criteria, CriteriaStyle::Short),
            report_format(request.criteria, "Optional suggestions"),
        );

        generate_report(llm, request, document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(
        data: &mut ReflectionData,
        phase: ReflectionPhase,
        message: &str,
        response: &str,
        turns: usize,
    ) -> (Option<(ReflectionPhase, Trigger)>, WorkflowStatus) {
        let mut status = WorkflowStatus::Active;
        let t = update_phase(data, &mut status, phase, message, response, "", turns);
        (t, status)
    }

    #[test]
    fn test_aspiration_needs_both_phrases() {
        let mut data = ReflectionData::default();
        let (t, _) = apply(&mut data, ReflectionPhase::Aspiration, "I want to lead", "Перейдемо до справи", 1);
        assert_eq!(t, None);
        assert_eq!(data.aspiration.responses, vec!["I want to lead"]);

        let (t, _) = apply(
            &mut data,
            ReflectionPhase::Aspiration,
            "By next year",
            "Чудово! Тепер перейдемо до ваших сильних сторін.",
            2,
        );
        assert_eq!(t, Some((ReflectionPhase::Strengths, Trigger::SignalPhrase)));
        assert_eq!(data.phase, Some(ReflectionPhase::Strengths));
        assert!(data.aspiration.completed);
    }

    #[test]
    fn test_strengths_and_feed_forward_transitions() {
        let mut data = ReflectionData::default();
        apply(&mut data, ReflectionPhase::Strengths, "I listen well", "Визначимо конкретні дії", 3);
        assert_eq!(data.phase, Some(ReflectionPhase::FeedForward));

        apply(&mut data, ReflectionPhase::FeedForward, "Weekly review", "Дякую за продуктивну сесію!", 4);
        assert_eq!(data.phase, Some(ReflectionPhase::Summary));
        assert!(data.feed_forward.completed);
    }

    #[test]
    fn test_summary_turn_finishes() {
        let mut data = ReflectionData {
            phase: Some(ReflectionPhase::Summary),
            ..Default::default()
        };
        let (_, status) = apply(&mut data, ReflectionPhase::Summary, "ok", "Here is your canvas", 5);
        assert_eq!(status, WorkflowStatus::Finished);
    }

    #[test]
    fn test_timebox_forces_summary() {
        let mut data = ReflectionData::default();
        let mut status = WorkflowStatus::Active;
        let t = update_phase(
            &mut data,
            &mut status,
            ReflectionPhase::Strengths,
            "more",
            "tell me more",
            "10 хвилин",
            8,
        );
        assert_eq!(t, Some((ReflectionPhase::Summary, Trigger::Timebox)));

        let mut data = ReflectionData::default();
        let t = update_phase(
            &mut data,
            &mut status,
            ReflectionPhase::Strengths,
            "more",
            "tell me more",
            "20 хвилин",
            14,
        );
        assert_eq!(t, None);
        assert!(timebox_expired("20 хвилин", 15));
        assert!(!timebox_expired("", 50));
    }

    #[test]
    fn test_stop_phrase_forces_summary() {
        let mut data = ReflectionData::default();
        let (t, _) = apply(&mut data, ReflectionPhase::Aspiration, "Давай, завершуй", "Добре", 2);
        assert_eq!(t, Some((ReflectionPhase::Summary, Trigger::StopPhrase)));
        assert_eq!(data.phase, Some(ReflectionPhase::Summary));
    }

    #[test]
    fn test_asf_guide_from_text_or_object() {
        let text = vec![json!({"asf": "{\"aspiration_questions\": \"Where do you see yourself?\"}"})];
        let state = SessionState::new(1, 1, WorkflowKind::Reflection, text, 3);
        let spec = CoachSpec::from_state(&state);
        assert_eq!(
            spec.guide("aspiration_questions", "fallback"),
            "Where do you see yourself?"
        );
        assert_eq!(spec.guide("strengths_questions", "fallback"), "fallback");
        assert_eq!(spec.goal, DEFAULT_GOAL);

        let object = vec![json!({"asf": {"strengths_questions": "What energises you?"}, "asf_bad": 1})];
        let state = SessionState::new(1, 1, WorkflowKind::Reflection, object, 3);
        let spec = CoachSpec::from_state(&state);
        assert_eq!(spec.guide("strengths_questions", "x"), "What energises you?");

        let broken = vec![json!({"asf": "{not json"})];
        let state = SessionState::new(1, 1, WorkflowKind::Reflection, broken, 3);
        assert_eq!(CoachSpec::from_state(&state).guide("aspiration_questions", "fb"), "fb");
    }

    #[test]
    fn test_history_window_labels_phases() {
        let turns: Vec<ReflectionTurn> = (0..12)
            .map(|i| ReflectionTurn {
                user_message: format!("msg {i}"),
                coach_response: format!("reply {i}"),
                timestamp: Utc::now(),
                phase: ReflectionPhase::Strengths,
            })
            .collect();
        let text = history(&turns);
        assert!(!text.contains("msg 1\n"));
        assert!(text.contains("Turn 1 [strengths]:\nCoachee: msg 2"));
        assert!(text.contains("Turn 10 [strengths]:\nCoachee: msg 11"));
    }
}
