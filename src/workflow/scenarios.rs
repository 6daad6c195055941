//! Scenario tests driving each workflow through whole conversations
//!
//! Generation is scripted with `MockLlmClient`; state lives in
//! `InMemoryStorage`, so every assertion reads what a real turn persisted.

use super::analogous::AnalogousWorkflow;
use super::examination::ExaminationWorkflow;
use super::fill_gaps::{FillGapsWorkflow, FILL_GAPS_ASSIGNMENTS};
use super::reflection::ReflectionWorkflow;
use super::roleplay::RoleplayWorkflow;
use super::*;
use crate::db::{Block, SessionStatus};
use crate::runtime::testing::{InMemoryStorage, MockLlmClient};
use crate::runtime::StateStore;
use serde_json::{json, Value};
use tokio::sync::mpsc;

struct Harness {
    storage: InMemoryStorage,
    llm: MockLlmClient,
    block: Block,
    session_id: i64,
}

impl Harness {
    fn new(template_id: i64, specifications: Value) -> Self {
        let storage = InMemoryStorage::new();
        let block_id = storage.add_block(Block {
            id: 0,
            template_id,
            specifications,
            eval_instructions: Some("Evaluate the learner.".to_string()),
            eval_criteria: json!([{"criterion_name": "Accuracy", "max_points": 10}]),
            model: None,
            instructions: None,
        });
        let session_id = storage.add_session(block_id);
        let block = storage.get_block(block_id).unwrap();
        Self {
            storage,
            llm: MockLlmClient::new(),
            block,
            session_id,
        }
    }

    fn ctx<'a>(&'a self, sink: &'a ReplySink) -> TurnContext<'a> {
        TurnContext {
            session_id: self.session_id,
            block: &self.block,
            llm: &self.llm,
            store: &self.storage,
            sink,
            model: "gpt-4o",
            max_follow_ups: DEFAULT_MAX_FOLLOW_UPS,
        }
    }

    async fn send(&self, workflow: &dyn Workflow, message: &str) -> String {
        let sink = ReplySink::silent();
        workflow.advance(&self.ctx(&sink), message).await.unwrap()
    }

    /// Send a message and collect what reached the sink
    async fn send_streaming(&self, workflow: &dyn Workflow, message: &str) -> (String, Vec<String>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let sink = ReplySink::streaming(tx);
        let reply = workflow.advance(&self.ctx(&sink), message).await.unwrap();
        drop(sink);
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        (reply, chunks)
    }

    fn state(&self) -> SessionState {
        self.storage.get_current_state(self.session_id).unwrap()
    }

    fn session_status(&self) -> SessionStatus {
        self.storage.get_session(self.session_id).unwrap().status
    }

    fn calls(&self) -> usize {
        self.llm.recorded_requests().len()
    }
}

// ============================================================================
// Shared lifecycle
// ============================================================================

#[tokio::test]
async fn load_or_create_is_idempotent() {
    let h = Harness::new(12, json!([{"question": "Q1"}, {"question": "Q2"}]));
    let sink = ReplySink::silent();
    let ctx = h.ctx(&sink);

    let first = ctx.load_or_create(WorkflowKind::Examination).await.unwrap();
    let second = ctx.load_or_create(WorkflowKind::Examination).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.questions.len(), 2);
    assert_eq!(first.max_follow_ups, DEFAULT_MAX_FOLLOW_UPS);
}

#[tokio::test]
async fn state_of_another_workflow_is_rejected() {
    let h = Harness::new(12, json!([{"question": "Q1"}]));
    let foreign = SessionState::new(h.session_id, h.block.id, WorkflowKind::Custom, vec![], 3);
    h.storage.save_state(&foreign).await.unwrap();

    let sink = ReplySink::silent();
    let err = ExaminationWorkflow
        .advance(&h.ctx(&sink), "hello")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::ShapeMismatch {
            expected: WorkflowKind::Examination,
            found: WorkflowKind::Custom
        }
    ));
    assert_eq!(h.calls(), 0);
}

#[tokio::test]
async fn failed_state_save_does_not_fail_the_turn() {
    let h = Harness::new(25, json!([]));
    let registry = WorkflowRegistry::new();
    let custom = registry.resolve(25).unwrap();

    h.llm.queue_text("First answer");
    h.send(custom.as_ref(), "hello").await;

    h.storage.fail_state_saves();
    h.llm.queue_text("Second answer");
    let reply = h.send(custom.as_ref(), "again").await;
    assert_eq!(reply, "Second answer");
    // The stored state still holds only the first turn
    assert_eq!(h.state().turn_count(), 1);
}

// ============================================================================
// Examination
// ============================================================================

fn exam_verdict(complete: bool, needs_clarification: bool) -> Value {
    json!({
        "complete": complete,
        "missing_concepts": if complete { json!([]) } else { json!(["drop"]) },
        "needs_clarification": needs_clarification
    })
}

#[tokio::test]
async fn examination_runs_questions_and_follow_ups() {
    let h = Harness::new(
        12,
        json!([
            {"question": "What is ownership?", "key_concepts": "single owner"},
            {"question": "What is borrowing?", "key_concepts": "references, lifetimes"}
        ]),
    );
    let exam = ExaminationWorkflow;
    let within_budget = |state: &SessionState| state.follow_up_count <= state.max_follow_ups;

    // Opening message: the first question is asked whatever the learner says
    h.llm.queue_text("Що таке володіння?");
    assert_eq!(h.send(&exam, "Привіт").await, "Що таке володіння?");
    assert_eq!(h.state().answers.examination().unwrap().len(), 1);

    // Complete answer moves straight to the next question
    h.llm.queue_json(&exam_verdict(true, false));
    h.llm.queue_text("Що таке запозичення?");
    assert_eq!(
        h.send(&exam, "Each value has a single owner").await,
        "Що таке запозичення?"
    );
    let state = h.state();
    assert_eq!(state.current_index, 1);
    assert!(within_budget(&state));

    // Partial answers earn follow-ups until the budget runs out
    for attempt in 1..=3 {
        h.llm.queue_json(&exam_verdict(false, true));
        h.llm.queue_text(format!("Розкажіть більше ({attempt})"));
        h.send(&exam, "Something about references").await;
        let state = h.state();
        assert_eq!(state.follow_up_count, attempt);
        assert!(within_budget(&state));
    }

    h.llm.queue_json(&exam_verdict(false, true));
    let reply = h.send(&exam, "Still not sure").await;
    assert!(reply.starts_with("Вітаю!"));

    let state = h.state();
    assert!(state.is_finished());
    assert_eq!(state.current_index, 2);
    assert_eq!(h.session_status(), SessionStatus::Finished);
    assert_eq!(h.llm.pending(), 0);

    // Nothing moves once finished
    let calls = h.calls();
    assert_eq!(h.send(&exam, "one more").await, "Іспит вже завершено.");
    assert_eq!(h.calls(), calls);
    assert_eq!(h.state(), state);
}

#[tokio::test]
async fn examination_wrong_answers_re_ask_within_budget() {
    let h = Harness::new(
        12,
        json!([{"question": "What does the borrow checker verify?", "key_concepts": "aliasing"}]),
    );
    let exam = ExaminationWorkflow;

    h.llm.queue_text("Що перевіряє borrow checker?");
    h.send(&exam, "Привіт").await;

    // Wrong answers repeat the question itself rather than probing further
    for attempt in 1..=DEFAULT_MAX_FOLLOW_UPS {
        h.llm.queue_json(&exam_verdict(false, false));
        h.llm.queue_text("Що перевіряє borrow checker?");
        h.send(&exam, "It formats the code").await;

        let state = h.state();
        assert_eq!(state.follow_up_count, attempt);
        assert!(state.follow_up_count <= state.max_follow_ups);
        assert_eq!(state.current_index, 0);

        let prompt = h.llm.recorded_requests().last().unwrap().system_text();
        assert!(prompt.contains("Ask this question clearly"));
        assert!(!prompt.contains("partial answer"));
    }

    h.llm.queue_json(&exam_verdict(false, false));
    let reply = h.send(&exam, "It compiles faster").await;
    assert!(reply.starts_with("Вітаю!"));

    let state = h.state();
    assert!(state.is_finished());
    assert_eq!(state.current_index, 1);
    assert_eq!(state.answers.examination().unwrap().len(), 1);
    assert_eq!(h.llm.pending(), 0);
}

#[tokio::test]
async fn examination_without_questions_finishes_immediately() {
    let h = Harness::new(12, json!("not json at all"));
    let reply = h.send(&ExaminationWorkflow, "start").await;
    assert!(reply.contains("Іспит завершено"));
    assert!(h.state().is_finished());
    assert_eq!(h.calls(), 0);
}

#[tokio::test]
async fn examination_report_includes_answers() {
    let h = Harness::new(12, json!([{"question": "What is ownership?", "key_concepts": "owner"}]));
    let exam = ExaminationWorkflow;
    h.llm.queue_text("Question one");
    h.send(&exam, "hi").await;
    h.llm.queue_json(&exam_verdict(true, false));
    h.send(&exam, "One owner per value").await;

    let state = h.state();
    let criteria = parse_criteria(&h.block.eval_criteria);
    h.llm.queue_text("  # Evaluation Report\n**Total Score:** 9/10  ");
    let request = EvaluationRequest {
        session_id: h.session_id,
        state: &state,
        instructions: "Evaluate the learner.",
        criteria: &criteria,
        model: "gpt-4o",
    };
    let report = exam.evaluate(&h.llm, &request).await.unwrap();
    assert_eq!(report, "# Evaluation Report\n**Total Score:** 9/10");
    assert_eq!(extract_score(&report), Some(9.0));

    let requests = h.llm.recorded_requests();
    let document = requests.last().unwrap().system_text();
    assert!(document.contains("**Student answer:** One owner per value"));
    assert!(document.contains("**Total Score:** X/10"));
}

// ============================================================================
// FillGaps
// ============================================================================

fn grading(correct: bool) -> Value {
    json!({
        "all_correct": correct,
        "errors": if correct { json!([]) } else { json!(["gap 2: slept"]) },
        "feedback": "Keep practising."
    })
}

#[tokio::test]
async fn fill_gaps_grades_exactly_ten_assignments() {
    let h = Harness::new(
        26,
        json!([{"Learning goal": "Past simple", "Assignment sample": "I (1. ___) home."}]),
    );
    let drill = FillGapsWorkflow;

    h.llm.queue_text("The cat (1. ___) on the mat (2. ___) yesterday.");
    h.send(&drill, "start").await;

    for i in 0..FILL_GAPS_ASSIGNMENTS {
        h.llm.queue_json(&grading(i % 2 == 0));
        if i + 1 < FILL_GAPS_ASSIGNMENTS {
            h.llm.queue_text(format!("Assignment {} (1. ___) and (2. ___) here.", i + 2));
        }
        let reply = h.send(&drill, "1. sat 2. slept").await;
        if i + 1 == FILL_GAPS_ASSIGNMENTS {
            assert!(reply.contains("completed all 10 assignments"));
        }
    }

    let state = h.state();
    assert!(state.is_finished());
    assert_eq!(state.current_index, FILL_GAPS_ASSIGNMENTS);
    let turns = state.answers.fill_gaps().unwrap();
    assert_eq!(turns.iter().filter(|t| t.graded).count(), FILL_GAPS_ASSIGNMENTS);
    assert_eq!(h.session_status(), SessionStatus::Finished);
    assert_eq!(h.llm.pending(), 0);

    let calls = h.calls();
    h.send(&drill, "1. went 2. saw").await;
    assert_eq!(h.calls(), calls);
    assert_eq!(h.state().current_index, FILL_GAPS_ASSIGNMENTS);
}

#[tokio::test]
async fn fill_gaps_questions_stream_help_without_grading() {
    let h = Harness::new(26, json!([{"Learning goal": "Past simple"}]));
    let drill = FillGapsWorkflow;

    h.llm.queue_text("She (1. ___) to school and (2. ___) lunch there.");
    let (assignment, chunks) = h.send_streaming(&drill, "begin").await;
    assert!(chunks.len() > 1);
    assert_eq!(chunks.concat(), assignment);

    h.llm.queue_text("Gap 1 needs a verb of motion in the past.");
    let (reply, chunks) = h
        .send_streaming(&drill, "what verb goes in gap 1?")
        .await;
    assert_eq!(chunks.concat(), reply);

    let state = h.state();
    assert_eq!(state.current_index, 0);
    let open = state.answers.fill_gaps().unwrap().last().unwrap().clone();
    assert!(open.waiting_for_answer);
    assert!(!open.graded);
    assert_eq!(open.user_message, "what verb goes in gap 1?");
    assert_eq!(open.tutor_response, reply);

    // The learner's question went to the model as user input
    let last = h.llm.recorded_requests().pop().unwrap();
    assert_eq!(last.messages.len(), 1);
}

#[tokio::test]
async fn fill_gaps_report_carries_statistics() {
    let h = Harness::new(26, json!([{"Learning goal": "Past simple"}]));
    let drill = FillGapsWorkflow;
    h.llm.queue_text("He (1. ___) fast and (2. ___) early today.");
    h.send(&drill, "go").await;
    h.llm.queue_json(&grading(false));
    h.llm.queue_text("Next (1. ___) one (2. ___) here now.");
    h.send(&drill, "1. ran 2. leave").await;

    let state = h.state();
    let criteria = parse_criteria(&h.block.eval_criteria);
    h.llm.queue_text("Total Score: 4/10");
    let request = EvaluationRequest {
        session_id: h.session_id,
        state: &state,
        instructions: "Evaluate the learner.",
        criteria: &criteria,
        model: "gpt-4o",
    };
    drill.evaluate(&h.llm, &request).await.unwrap();

    let document = h.llm.recorded_requests().pop().unwrap().system_text();
    assert!(document.contains("Total assignments completed: 1"));
    assert!(document.contains("Accuracy rate: 0.0%"));
    assert!(document.contains("gap 2: slept"));
}

// ============================================================================
// Roleplay
// ============================================================================

#[tokio::test]
async fn roleplay_finishes_at_stated_turn_limit() {
    let h = Harness::new(
        27,
        json!([{"finish_dialogue_conditions": "Finish after 3 turns", "role": "shop assistant"}]),
    );
    let roleplay = RoleplayWorkflow;

    for i in 1..=3 {
        h.llm.queue_text(format!("Shop reply {i}: what else would you like today?"));
        let (reply, chunks) = h.send_streaming(&roleplay, &format!("line {i}")).await;
        assert_eq!(chunks.concat(), reply);
        assert_eq!(h.state().is_finished(), i == 3);
    }

    let state = h.state();
    let turns = state.answers.roleplay().unwrap();
    assert_eq!(turns.iter().map(|t| t.turn).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(h.session_status(), SessionStatus::Finished);

    assert_eq!(h.send(&roleplay, "hello?").await, "Role-play завершено. Дякую за участь!");
    assert_eq!(h.calls(), 3);
}

#[tokio::test]
async fn roleplay_without_conditions_keeps_going() {
    let h = Harness::new(27, json!([{"role": "interviewer"}]));
    let roleplay = RoleplayWorkflow;
    for i in 1..=4 {
        h.llm.queue_text("That concludes the interview. Thank you for coming.");
        h.send(&roleplay, &format!("answer {i}")).await;
    }
    assert!(!h.state().is_finished());
    assert_eq!(h.state().turn_count(), 4);
}

// ============================================================================
// Reflection
// ============================================================================

#[tokio::test]
async fn reflection_moves_through_phases() {
    let h = Harness::new(28, json!([{"goal": "Reflect on the sprint", "timebox": "20 хвилин"}]));
    let coach = ReflectionWorkflow;

    let phase_of = |state: &SessionState| match &state.custom_data {
        WorkflowData::Reflection(data) => data.phase,
        _ => None,
    };

    h.llm.queue_text("Вітаю! Яка ваша мета на цю сесію?");
    h.send(&coach, "Привіт").await;
    assert_eq!(phase_of(&h.state()), Some(ReflectionPhase::Aspiration));

    h.llm.queue_text("Чудово. Тепер перейдемо до сильних сторін.");
    h.send(&coach, "Хочу покращити тестування").await;
    assert_eq!(phase_of(&h.state()), Some(ReflectionPhase::Strengths));

    h.llm.queue_text("Гаразд, зробимо підсумок.");
    h.send(&coach, "завершуй, будь ласка").await;
    assert_eq!(phase_of(&h.state()), Some(ReflectionPhase::Summary));
    assert!(!h.state().is_finished());

    h.llm.queue_text("Ось підсумок нашої розмови.");
    h.send(&coach, "Дякую").await;
    let state = h.state();
    assert!(state.is_finished());
    assert_eq!(h.session_status(), SessionStatus::Finished);

    let phases: Vec<ReflectionPhase> = state
        .answers
        .reflection()
        .unwrap()
        .iter()
        .map(|t| t.phase)
        .collect();
    assert_eq!(
        phases,
        vec![
            ReflectionPhase::Aspiration,
            ReflectionPhase::Aspiration,
            ReflectionPhase::Strengths,
            ReflectionPhase::Summary,
        ]
    );

    let WorkflowData::Reflection(data) = &state.custom_data else {
        panic!("reflection data missing");
    };
    assert!(data.aspiration.completed);
    assert_eq!(data.aspiration.responses.len(), 2);

    assert_eq!(h.send(&coach, "ще").await, "Reflection session завершено. Дякую!");
    assert_eq!(h.calls(), 4);
}

// ============================================================================
// Analogous
// ============================================================================

#[tokio::test]
async fn analogous_negotiates_topic_then_grades() {
    let h = Harness::new(
        29,
        json!([{"learning_goal": "Present simple", "flexible part": "topic", "examples": "I play chess."}]),
    );
    let tutor = AnalogousWorkflow;

    h.llm.queue_text("Яку тему оберемо?");
    assert_eq!(h.send(&tutor, "Привіт").await, "Яку тему оберемо?");
    let state = h.state();
    assert!(state.answers.analogous().unwrap()[0].waiting_for_topic);

    // Too vague to be a topic
    h.llm.queue_text("Наприклад, космос або спорт.");
    h.send(&tutor, "Не знаю?").await;
    assert_eq!(h.state().custom_data, WorkflowData::None);

    h.llm.queue_text("Write two sentences about rockets and their missions.");
    h.send(&tutor, "Space exploration missions").await;
    let state = h.state();
    assert_eq!(
        state.custom_data,
        WorkflowData::Analogous {
            topic: "Space exploration missions".to_string()
        }
    );
    let record = &state.answers.analogous().unwrap()[0];
    assert!(record.waiting_for_answer);
    assert!(!record.waiting_for_topic);

    // Acknowledgement gets a nudge, not a grade
    h.llm.queue_text("Take your time and write your sentences.");
    h.send(&tutor, "ok got it").await;
    assert_eq!(h.state().current_index, 0);

    h.llm.queue_json(&json!({"correct": true, "errors": [], "feedback": "Nice work."}));
    h.llm.queue_text("Assignment 2: describe a Mars rover in two sentences.");
    let reply = h
        .send(&tutor, "Rockets carry satellites into orbit safely.")
        .await;
    assert!(reply.starts_with("Assignment 2"));

    let state = h.state();
    assert_eq!(state.current_index, 1);
    let turns = state.answers.analogous().unwrap();
    assert_eq!(turns.len(), 2);
    assert!(turns[0].graded);
    assert_eq!(turns[0].answer, "Rockets carry satellites into orbit safely.");
    assert!(turns[1].waiting_for_answer);
    assert_eq!(turns[1].assignment_index, 1);
    assert_eq!(h.llm.pending(), 0);
}
