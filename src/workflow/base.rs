//! Shared workflow lifecycle
//!
//! Every workflow turn runs against a [`TurnContext`]: the block being
//! taught, the generation and storage collaborators, and a [`ReplySink`]
//! that carries reply text to a streaming caller.

use super::{SessionState, WorkflowError, WorkflowKind, WorkflowStatus};
use crate::db::{Block, SessionStatus, SessionUpdate};
use crate::llm::{LlmRequest, ResponseSchema};
use crate::runtime::{LlmClient, Storage};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

/// Destination for reply text as it is produced
///
/// Streaming workflows push each generated fragment; everything else pushes
/// its full reply once. A caller that went away only loses the fragments:
/// the turn still completes and persists.
#[derive(Debug, Default)]
pub struct ReplySink {
    tx: Option<mpsc::Sender<String>>,
}

impl ReplySink {
    /// A sink for callers that only want the final text
    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn streaming(tx: mpsc::Sender<String>) -> Self {
        Self { tx: Some(tx) }
    }

    pub async fn emit(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(tx) = &self.tx {
            // Receiver dropped means the client disconnected
            let _ = tx.send(text.to_string()).await;
        }
    }
}

/// Everything a workflow needs to advance one session by one message
pub struct TurnContext<'a> {
    pub session_id: i64,
    pub block: &'a Block,
    pub llm: &'a dyn LlmClient,
    pub store: &'a dyn Storage,
    pub sink: &'a ReplySink,
    /// Model for every generation call of this turn
    pub model: &'a str,
    /// Follow-up budget for newly created sessions
    pub max_follow_ups: u32,
}

impl TurnContext<'_> {
    /// Fetch the session's state, creating and persisting a fresh one if absent
    pub async fn load_or_create(&self, kind: WorkflowKind) -> Result<SessionState, WorkflowError> {
        if let Some(state) = self
            .store
            .load_state(self.session_id)
            .await
            .map_err(WorkflowError::Storage)?
        {
            if state.answers.kind() != kind {
                return Err(WorkflowError::ShapeMismatch {
                    expected: kind,
                    found: state.answers.kind(),
                });
            }
            return Ok(state);
        }

        let questions = super::parse_specifications(&self.block.specifications);
        let state = SessionState::new(
            self.session_id,
            self.block.id,
            kind,
            questions,
            self.max_follow_ups,
        );
        self.store
            .save_state(&state)
            .await
            .map_err(WorkflowError::Storage)?;

        tracing::info!(
            session_id = self.session_id,
            block_id = self.block.id,
            workflow = %kind,
            questions = state.questions.len(),
            "Created session state"
        );
        Ok(state)
    }

    /// Save state; failures are logged, never surfaced
    pub async fn persist(&self, state: &SessionState) {
        if let Err(e) = self.store.save_state(state).await {
            tracing::error!(
                session_id = self.session_id,
                workflow = %state.answers.kind(),
                error = %e,
                "Failed to save session state"
            );
        }
    }

    /// Mark the session finished, save it and notify the session record
    pub async fn finish(&self, state: &mut SessionState) {
        state.status = WorkflowStatus::Finished;
        self.persist(state).await;

        let update = SessionUpdate {
            status: Some(SessionStatus::Finished),
            ..Default::default()
        };
        if let Err(e) = self
            .store
            .update_session_status(self.session_id, &update)
            .await
        {
            tracing::error!(
                session_id = self.session_id,
                workflow = %state.answers.kind(),
                error = %e,
                "Failed to mark session finished"
            );
        }
        tracing::info!(
            session_id = self.session_id,
            workflow = %state.answers.kind(),
            turns = state.turn_count(),
            "Session finished"
        );
    }

    /// Send a complete reply to the caller and hand it back
    pub async fn reply(&self, text: impl Into<String>) -> String {
        let text = text.into();
        self.sink.emit(&text).await;
        text
    }

    /// Generate a full reply without emitting it
    pub async fn generate(&self, request: LlmRequest) -> Result<String, WorkflowError> {
        let response = self.llm.complete(&request.model(self.model)).await?;
        Ok(response.text)
    }

    /// Generate a reply, forwarding fragments to the sink as they arrive
    pub async fn stream(&self, request: LlmRequest) -> Result<String, WorkflowError> {
        let mut stream = self.llm.complete_stream(&request.model(self.model)).await?;
        let mut full = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            self.sink.emit(&chunk).await;
            full.push_str(&chunk);
        }
        Ok(full)
    }

    /// Generate schema-constrained JSON and decode it
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        request: LlmRequest,
        schema: ResponseSchema,
    ) -> Result<T, WorkflowError> {
        let name = schema.name.clone();
        let text = self.generate(request.schema(schema)).await?;
        serde_json::from_str(strip_code_fence(&text)).map_err(|e| {
            tracing::warn!(
                session_id = self.session_id,
                schema = %name,
                error = %e,
                "Structured output did not decode"
            );
            WorkflowError::MalformedOutput(format!("{name}: {e}"))
        })
    }
}

/// Some gateways wrap JSON output in a markdown fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_reply_sink_forwards_and_tolerates_disconnect() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ReplySink::streaming(tx);
        sink.emit("hello").await;
        sink.emit("").await;
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));

        drop(rx);
        // Must not panic or block
        sink.emit("after disconnect").await;

        ReplySink::silent().emit("nowhere").await;
    }
}
