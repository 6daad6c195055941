//! Topic-driven assignments
//!
//! The learner first picks a topic; every assignment after that is built
//! around it. Assignments continue until the session is evaluated.

use super::base::TurnContext;
use super::classifier::{self, is_topic_clarification, Submission};
use super::evaluation::{evaluate_assignments, EvaluationRequest};
use super::fill_gaps::recent_conversation;
use super::spec::SpecRecord;
use super::state::retain_recent;
use super::{
    AssignmentEvaluation, AssignmentTurn, SessionState, Workflow, WorkflowData, WorkflowError,
    WorkflowKind,
};
use crate::llm::{LlmRequest, ResponseSchema};
use crate::runtime::LlmClient;
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use serde_json::json;

const FINISHED_REPLY: &str = "Assignments завершено. Дякую за роботу!";

const TUTOR_TEMPERATURE: f32 = 0.7;
const TUTOR_MAX_TOKENS: u32 = 1024;
const GRADER_TEMPERATURE: f32 = 0.2;
const GRADER_MAX_TOKENS: u32 = 512;

const PRAISE: &[&str] = &[
    "✅ Excellent work! That's exactly right.",
    "✅ Perfect! You nailed it.",
    "✅ Great job! All correct.",
    "✅ Well done! Your answers are spot on.",
];

pub struct AnalogousWorkflow;

struct TopicSpec {
    learning_goal: String,
    flexible_part: String,
    examples: String,
}

impl TopicSpec {
    fn from_state(state: &SessionState) -> Self {
        let spec = SpecRecord::first(&state.questions);
        Self {
            learning_goal: spec.text("learning_goal"),
            flexible_part: spec.text("flexible part"),
            examples: spec.text("examples"),
        }
    }
}

fn topic(state: &SessionState) -> &str {
    match &state.custom_data {
        WorkflowData::Analogous { topic } => topic,
        _ => "",
    }
}

fn grading_schema() -> ResponseSchema {
    ResponseSchema::new(
        "assignment_evaluation",
        json!({
            "type": "object",
            "properties": {
                "correct": {"type": "boolean"},
                "errors": {"type": "array", "items": {"type": "string"}},
                "feedback": {"type": "string"}
            },
            "required": ["correct", "errors", "feedback"],
            "additionalProperties": false
        }),
    )
}

fn topic_prompt(spec: &TopicSpec, history: &str) -> String {
    format!(
        "You are a friendly English tutor starting a conversation.\n\n\
         {history}\n\
         # Your task:\n\
         Ask the student what topic they'd like to practice with today. If they already \
         replied with a question or a very short answer, help them settle on a topic.\n\n\
         # Guidance:\n{}\n\n\
         Be warm and conversational. Give 2-3 interesting example topics.\n\n\
         Keep it natural and inviting (max 100 words).",
        spec.flexible_part
    )
}

fn assignment_rules(topic: &str) -> String {
    format!(
        "CRITICAL RULES:\n\
         1. Present ONLY the clean assignment with numbered tasks\n\
         2. NO meta-sections like \"Learning Goal\" or \"Assignment Format\"\n\
         3. NO internal instructions visible to student\n\
         4. Add a brief, warm intro (1-2 sentences) that feels natural\n\
         5. Make it about: {topic}\n\
         6. Be conversational and encouraging"
    )
}

fn first_assignment_prompt(spec: &TopicSpec, topic: &str, history: &str) -> String {
    format!(
        "You are a friendly English tutor presenting the first assignment.\n\n\
         {history}\n\
         # Topic chosen: {topic}\n\n\
         # Assignment instructions:\n\
         - Learning Goal: {}\n\
         - Format reference: {}\n\n\
         {}\n\n\
         Generate assignment #1 now.",
        spec.learning_goal,
        spec.examples,
        assignment_rules(topic)
    )
}

fn help_prompt(assignment: &str, topic: &str, message: &str, history: &str) -> String {
    format!(
        "You are a warm, helpful English tutor. The student needs help with the assignment.\n\n\
         {history}\n\
         # Current assignment:\n{assignment}\n\n\
         # Topic: {topic}\n\n\
         # Student's message:\n{message}\n\n\
         # Your task:\n\
         The student is asking for help or clarification. Be supportive and conversational!\n\n\
         You can:\n\
         - Break down the task step by step\n\
         - Give examples similar to what they need to do\n\
         - Explain vocabulary or grammar in simple terms\n\
         - Provide hints without giving the exact answer\n\
         - If they asked in Ukrainian, acknowledge it and respond in English in a warm way\n\n\
         Be natural, not robotic. Keep your response helpful and friendly (max 250 words).\n\n\
         Remind them gently that they can try when they feel ready."
    )
}

fn nudge_prompt(message: &str) -> String {
    format!(
        "The student sent: \"{message}\"\n\n\
         This doesn't look like a complete answer to the assignment.\n\n\
         Respond warmly and naturally:\n\
         - Acknowledge what they sent\n\
         - Gently ask them to provide the full answer with all tasks completed\n\
         - Offer help if they're stuck\n\
         - Keep it conversational and friendly\n\n\
         Max 120 words."
    )
}

/// Learner-facing feedback block, with a randomly picked line of praise
fn feedback_block(evaluation: &AssignmentEvaluation, next_number: usize) -> String {
    let mut parts = Vec::new();
    if evaluation.correct {
        let praise = PRAISE
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(PRAISE[0]);
        parts.push(praise.to_string());
    } else {
        parts.push("Let me check your answers:\n".to_string());
        parts.extend(evaluation.errors.iter().map(|e| format!("❌ {e}")));
        parts.push(format!("\n{}", evaluation.feedback));
        parts.push("\nNo worries though – let's keep practicing! 💪".to_string());
    }
    parts.push(format!(
        "\n\n**Ready for the next challenge? Assignment #{next_number}**\n"
    ));
    parts.join("\n")
}

fn next_assignment_prompt(
    spec: &TopicSpec,
    topic: &str,
    history: &str,
    answer: &str,
    feedback: &str,
    number: usize,
) -> String {
    format!(
        "You are a friendly, encouraging English tutor. Give feedback naturally and present \
         the next assignment.\n\n\
         {history}\n\
         # Student's previous answer:\n{answer}\n\n\
         # Your feedback:\n{feedback}\n\n\
         # Now create the NEXT assignment:\n\
         - Topic: {topic}\n\
         - Learning Goal: {}\n\
         - Format reference: {}\n\n\
         {}\n\n\
         Generate assignment #{number} now.",
        spec.learning_goal,
        spec.examples,
        assignment_rules(topic)
    )
}

fn grading_prompt(assignment: &str, answer: &str) -> String {
    format!(
        "Evaluate the English assignment answer.\n\n\
         # Assignment\n{assignment}\n\n\
         # Student Answer\n{answer}\n\n\
         Check:\n\
         - Is the answer complete?\n\
         - Are grammar and vocabulary correct?\n\
         - Does it address the task?\n\
         - Be lenient with minor mistakes if meaning is clear\n\n\
         Report whether it is correct, a list of error explanations, and encouraging overall \
         feedback."
    )
}

fn tutor_request(prompt: String) -> LlmRequest {
    LlmRequest::with_instructions(prompt)
        .temperature(TUTOR_TEMPERATURE)
        .max_tokens(TUTOR_MAX_TOKENS)
}

/// Where the learner is in the topic/assignment cycle
enum Stage {
    Start,
    NegotiatingTopic,
    AwaitingAnswer(String),
    /// Last assignment graded without a follow-up being opened
    Between,
}

impl AnalogousWorkflow {
    fn stage(state: &SessionState) -> Result<Stage, WorkflowError> {
        let turns = state.answers.analogous()?;
        Ok(match turns.last() {
            None => Stage::Start,
            Some(t) if t.waiting_for_topic => Stage::NegotiatingTopic,
            Some(t) if t.waiting_for_answer => Stage::AwaitingAnswer(t.assignment.clone()),
            Some(_) => Stage::Between,
        })
    }

    async fn open_negotiation(
        ctx: &TurnContext<'_>,
        state: &mut SessionState,
    ) -> Result<String, WorkflowError> {
        let prompt = topic_prompt(&TopicSpec::from_state(state), "");
        let response = ctx.generate(tutor_request(prompt)).await?;

        let mut record = AssignmentTurn::topic_negotiation();
        record.assignment.clone_from(&response);
        state.answers.analogous_mut()?.push(record);
        ctx.persist(state).await;
        Ok(ctx.reply(response).await)
    }

    async fn negotiate_topic(
        ctx: &TurnContext<'_>,
        state: &mut SessionState,
        message: &str,
    ) -> Result<String, WorkflowError> {
        let candidate = message.trim();

        if is_topic_clarification(candidate) {
            let prompt = {
                let turns = state.answers.analogous()?;
                topic_prompt(&TopicSpec::from_state(state), &recent_conversation(turns))
            };
            let response = ctx.generate(tutor_request(prompt).user_input(message)).await?;
            if let Some(record) = state.answers.analogous_mut()?.last_mut() {
                record.user_message = message.to_string();
                record.tutor_response.clone_from(&response);
            }
            ctx.persist(state).await;
            return Ok(ctx.reply(response).await);
        }

        tracing::info!(
            session_id = ctx.session_id,
            workflow = "analogous",
            topic = candidate,
            "Topic chosen"
        );
        state.custom_data = WorkflowData::Analogous {
            topic: candidate.to_string(),
        };

        let prompt = {
            let turns = state.answers.analogous()?;
            first_assignment_prompt(
                &TopicSpec::from_state(state),
                candidate,
                &recent_conversation(turns),
            )
        };
        let response = ctx.generate(tutor_request(prompt)).await?;
        if let Some(record) = state.answers.analogous_mut()?.last_mut() {
            record.waiting_for_topic = false;
            record.waiting_for_answer = true;
            record.assignment.clone_from(&response);
        }
        ctx.persist(state).await;
        Ok(ctx.reply(response).await)
    }

    async fn converse(
        ctx: &TurnContext<'_>,
        state: &mut SessionState,
        message: &str,
        assignment: &str,
        submission: Submission,
    ) -> Result<String, WorkflowError> {
        let prompt = match submission {
            Submission::Acknowledgement => nudge_prompt(message),
            _ => {
                let turns = state.answers.analogous()?;
                help_prompt(assignment, topic(state), message, &recent_conversation(turns))
            }
        };
        let response = ctx.generate(tutor_request(prompt).user_input(message)).await?;
        if let Some(record) = state.answers.analogous_mut()?.last_mut() {
            record.user_message = message.to_string();
            record.tutor_response.clone_from(&response);
        }
        ctx.persist(state).await;
        Ok(ctx.reply(response).await)
    }

    async fn grade(
        ctx: &TurnContext<'_>,
        state: &mut SessionState,
        message: &str,
        assignment: &str,
    ) -> Result<String, WorkflowError> {
        if let Some(record) = state.answers.analogous_mut()?.last_mut() {
            record.answer = message.to_string();
            record.timestamp = Utc::now();
            record.waiting_for_answer = false;
        }

        let request = LlmRequest::with_instructions(grading_prompt(assignment, message))
            .temperature(GRADER_TEMPERATURE)
            .max_tokens(GRADER_MAX_TOKENS);
        let evaluation: AssignmentEvaluation =
            ctx.generate_structured(request, grading_schema()).await?;

        tracing::info!(
            session_id = ctx.session_id,
            workflow = "analogous",
            assignment = state.current_index + 1,
            correct = evaluation.correct,
            "Assignment graded"
        );

        state.current_index += 1;
        let feedback = feedback_block(&evaluation, state.current_index + 1);
        if let Some(record) = state.answers.analogous_mut()?.last_mut() {
            record.evaluation = Some(evaluation);
            record.graded = true;
        }
        ctx.persist(state).await;

        Self::next_assignment(ctx, state, message, &feedback).await
    }

    /// Generate the next assignment and open a record for it
    async fn next_assignment(
        ctx: &TurnContext<'_>,
        state: &mut SessionState,
        previous_answer: &str,
        feedback: &str,
    ) -> Result<String, WorkflowError> {
        let prompt = {
            let turns = state.answers.analogous()?;
            next_assignment_prompt(
                &TopicSpec::from_state(state),
                topic(state),
                &recent_conversation(turns),
                previous_answer,
                feedback,
                state.current_index + 1,
            )
        };
        let response = ctx.generate(tutor_request(prompt)).await?;

        let index = state.current_index;
        let turns = state.answers.analogous_mut()?;
        turns.push(AssignmentTurn::open(index, response.clone()));
        retain_recent(turns);
        ctx.persist(state).await;
        Ok(ctx.reply(response).await)
    }
}

#[async_trait]
impl Workflow for AnalogousWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Analogous
    }

    async fn advance(&self, ctx: &TurnContext<'_>, message: &str) -> Result<String, WorkflowError> {
        let mut state = ctx.load_or_create(WorkflowKind::Analogous).await?;

        if state.is_finished() {
            return Ok(ctx.reply(FINISHED_REPLY).await);
        }

        match Self::stage(&state)? {
            Stage::Start => Self::open_negotiation(ctx, &mut state).await,
            Stage::NegotiatingTopic => Self::negotiate_topic(ctx, &mut state, message).await,
            Stage::AwaitingAnswer(assignment) => {
                let submission = classifier::ANALOGOUS.classify(message, &assignment);
                tracing::debug!(
                    session_id = ctx.session_id,
                    workflow = "analogous",
                    ?submission,
                    "Classified submission"
                );
                if submission.is_answer() {
                    Self::grade(ctx, &mut state, message, &assignment).await
                } else {
                    Self::converse(ctx, &mut state, message, &assignment, submission).await
                }
            }
            Stage::Between => Self::next_assignment(ctx, &mut state, "", "").await,
        }
    }

    async fn evaluate(
        &self,
        llm: &dyn LlmClient,
        request: &EvaluationRequest<'_>,
    ) -> Result<String, WorkflowError> {
        let turns = request.state.answers.analogous()?;
        evaluate_assignments(llm, request, turns).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_feedback_uses_praise_line() {
        let eval = AssignmentEvaluation {
            correct: true,
            ..Default::default()
        };
        let text = feedback_block(&eval, 3);
        assert!(PRAISE.iter().any(|p| text.starts_with(p)));
        assert!(text.contains("**Ready for the next challenge? Assignment #3**"));
    }

    #[test]
    fn test_incorrect_feedback_encourages() {
        let eval = AssignmentEvaluation {
            correct: false,
            errors: vec!["task 2: use 'went'".to_string()],
            feedback: "Nearly there".to_string(),
        };
        let text = feedback_block(&eval, 2);
        assert!(text.starts_with("Let me check your answers:"));
        assert!(text.contains("❌ task 2: use 'went'"));
        assert!(text.contains("No worries though"));
    }

    #[test]
    fn test_stage_detection() {
        let mut state = SessionState::new(1, 1, WorkflowKind::Analogous, vec![], 3);
        assert!(matches!(AnalogousWorkflow::stage(&state), Ok(Stage::Start)));

        let turns = state.answers.analogous_mut().unwrap();
        turns.push(AssignmentTurn::topic_negotiation());
        assert!(matches!(
            AnalogousWorkflow::stage(&state),
            Ok(Stage::NegotiatingTopic)
        ));

        let turns = state.answers.analogous_mut().unwrap();
        turns[0].waiting_for_topic = false;
        turns[0].waiting_for_answer = true;
        turns[0].assignment = "Describe your trip".to_string();
        match AnalogousWorkflow::stage(&state) {
            Ok(Stage::AwaitingAnswer(a)) => assert_eq!(a, "Describe your trip"),
            _ => panic!("expected awaiting answer"),
        }
    }

    #[test]
    fn test_topic_lives_in_workflow_data() {
        let mut state = SessionState::new(1, 1, WorkflowKind::Analogous, vec![], 3);
        assert_eq!(topic(&state), "");
        state.custom_data = WorkflowData::Analogous {
            topic: "space travel".to_string(),
        };
        assert_eq!(topic(&state), "space travel");
    }
}
