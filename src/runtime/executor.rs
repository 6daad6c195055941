//! Session runtime executor

use super::traits::{LlmClient, Storage};
use super::RuntimeError;
use crate::db::{Block, ChatSession, MessagePair, SessionStatus, SessionUpdate};
use crate::workflow::{
    extract_score, parse_criteria, total_points, EvaluationRequest, ReplySink, SessionState,
    TurnContext, Workflow, WorkflowRegistry, DEFAULT_MAX_FOLLOW_UPS,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of an evaluation request
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub evaluation: String,
    pub grade: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub conversation_length: usize,
    pub criteria_count: usize,
    pub cached: bool,
    pub grade_saved: bool,
}

impl EvaluationOutcome {
    fn cached(session: &ChatSession) -> Self {
        Self {
            evaluation: session.work_summary.clone().unwrap_or_default(),
            grade: session.grade,
            timestamp: Utc::now(),
            conversation_length: 0,
            criteria_count: 0,
            cached: true,
            grade_saved: false,
        }
    }
}

/// Generic session runtime that can work with any storage and LLM implementations
pub struct SessionRuntime<S, L>
where
    S: Storage + 'static,
    L: LlmClient + 'static,
{
    storage: S,
    llm: L,
    registry: WorkflowRegistry,
    default_model: String,
    max_follow_ups: u32,
    /// One lock per active session; a turn holds it until its state is
    /// written and the entry is removed when the last holder releases it
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl<S, L> SessionRuntime<S, L>
where
    S: Storage + 'static,
    L: LlmClient + 'static,
{
    pub fn new(storage: S, llm: L, registry: WorkflowRegistry, default_model: String) -> Self {
        Self {
            storage,
            llm,
            registry,
            default_model,
            max_follow_ups: DEFAULT_MAX_FOLLOW_UPS,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Follow-up budget for sessions created from now on
    #[must_use]
    pub fn with_max_follow_ups(mut self, max_follow_ups: u32) -> Self {
        self.max_follow_ups = max_follow_ups;
        self
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    async fn session_lock(&self, session_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(session_id).or_default())
    }

    /// Drop the session's entry once no other caller holds or awaits it
    async fn release_lock(&self, session_id: i64, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks
            .get(&session_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&session_id);
        }
    }

    async fn session(&self, session_id: i64) -> Result<ChatSession, RuntimeError> {
        self.storage
            .load_session(session_id)
            .await
            .map_err(RuntimeError::Storage)?
            .ok_or(RuntimeError::SessionNotFound(session_id))
    }

    async fn block(&self, block_id: i64) -> Result<Block, RuntimeError> {
        self.storage
            .load_block(block_id)
            .await
            .map_err(RuntimeError::Storage)?
            .ok_or(RuntimeError::BlockNotFound(block_id))
    }

    fn workflow(&self, block: &Block) -> Result<Arc<dyn Workflow>, RuntimeError> {
        self.registry
            .resolve(block.template_id)
            .ok_or(RuntimeError::UnknownTemplate(block.template_id))
    }

    fn model_for<'a>(&'a self, block: &'a Block) -> &'a str {
        block
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.default_model)
    }

    /// Advance a session by one learner message and return the full reply.
    ///
    /// Fragments are pushed through `sink` while the turn runs. Turns for the
    /// same session run one at a time.
    pub async fn submit_message(
        &self,
        session_id: i64,
        content: &str,
        sink: &ReplySink,
    ) -> Result<String, RuntimeError> {
        let lock = self.session_lock(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_turn(session_id, content, sink).await
        };
        self.release_lock(session_id, lock).await;
        result
    }

    async fn run_turn(
        &self,
        session_id: i64,
        content: &str,
        sink: &ReplySink,
    ) -> Result<String, RuntimeError> {
        let session = self.session(session_id).await?;
        let block = self.block(session.block_id).await?;
        let workflow = self.workflow(&block)?;
        let model = self.model_for(&block);

        tracing::info!(
            session_id,
            template_id = block.template_id,
            workflow = %workflow.kind(),
            model,
            "Processing message"
        );

        let ctx = TurnContext {
            session_id,
            block: &block,
            llm: &self.llm,
            store: &self.storage,
            sink,
            model,
            max_follow_ups: self.max_follow_ups,
        };
        let reply = workflow.advance(&ctx, content).await.inspect_err(|e| {
            tracing::error!(
                session_id,
                workflow = %workflow.kind(),
                error = %e,
                "Turn failed"
            );
        })?;

        if let Err(e) = self
            .storage
            .add_message_pair(session_id, content, &reply)
            .await
        {
            tracing::error!(
                session_id,
                workflow = %workflow.kind(),
                error = %e,
                "Failed to save message pair"
            );
        }

        Ok(reply)
    }

    /// Produce, grade and store the evaluation report for a session.
    ///
    /// A session that already carries an evaluation returns it unchanged.
    pub async fn evaluate(&self, session_id: i64) -> Result<EvaluationOutcome, RuntimeError> {
        let lock = self.session_lock(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_evaluation(session_id).await
        };
        self.release_lock(session_id, lock).await;
        result
    }

    async fn run_evaluation(&self, session_id: i64) -> Result<EvaluationOutcome, RuntimeError> {
        let session = self.session(session_id).await?;
        if session.has_evaluation() {
            tracing::info!(session_id, "Returning stored evaluation");
            return Ok(EvaluationOutcome::cached(&session));
        }

        let block = self.block(session.block_id).await?;
        let instructions = block
            .eval_instructions
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(RuntimeError::MissingEvalInstructions)?;
        if block.eval_criteria.is_null() {
            return Err(RuntimeError::MissingCriteria);
        }
        let state = self
            .storage
            .load_state(session_id)
            .await
            .map_err(RuntimeError::Storage)?
            .ok_or(RuntimeError::StateNotFound(session_id))?;
        let workflow = self.workflow(&block)?;
        let criteria = parse_criteria(&block.eval_criteria);

        let request = EvaluationRequest {
            session_id,
            state: &state,
            instructions,
            criteria: &criteria,
            model: self.model_for(&block),
        };
        let report = workflow.evaluate(&self.llm, &request).await.inspect_err(|e| {
            tracing::error!(
                session_id,
                workflow = %workflow.kind(),
                error = %e,
                "Evaluation failed"
            );
        })?;

        let grade = extract_score(&report);
        if grade.is_none() {
            tracing::warn!(session_id, workflow = %workflow.kind(), "Report carries no score");
        }

        let update = SessionUpdate {
            status: Some(SessionStatus::Finished),
            grade,
            work_summary: Some(report.clone()),
        };
        let grade_saved = match self.storage.update_session_status(session_id, &update).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(session_id, error = %e, "Failed to save evaluation");
                false
            }
        };

        tracing::info!(
            session_id,
            workflow = %workflow.kind(),
            grade = ?grade,
            max_points = total_points(&criteria),
            "Session evaluated"
        );

        Ok(EvaluationOutcome {
            evaluation: report,
            grade,
            timestamp: Utc::now(),
            conversation_length: state.turn_count(),
            criteria_count: criteria.len(),
            cached: false,
            grade_saved,
        })
    }

    /// Current workflow state of a session
    pub async fn state(&self, session_id: i64) -> Result<SessionState, RuntimeError> {
        self.storage
            .load_state(session_id)
            .await
            .map_err(RuntimeError::Storage)?
            .ok_or(RuntimeError::StateNotFound(session_id))
    }

    /// Recorded message pairs of a session, oldest first
    pub async fn history(&self, session_id: i64) -> Result<Vec<MessagePair>, RuntimeError> {
        self.storage
            .get_messages(session_id)
            .await
            .map_err(RuntimeError::Storage)
    }
}
