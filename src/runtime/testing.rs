//! Mock implementations for testing
//!
//! These mocks enable workflow and runtime tests without real I/O.

use super::traits::*;
use crate::db::{Block, ChatSession, MessagePair, SessionStatus, SessionUpdate};
use crate::llm::{LlmError, LlmRequest, LlmResponse, TextStream};
use crate::workflow::SessionState;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
///
/// Full and streaming calls draw from the same queue; streamed replies are
/// cut into fragments of `chunk_chars` characters.
#[allow(dead_code)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    chunk_chars: usize,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

#[allow(dead_code)]
impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            chunk_chars: 4,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful text response
    pub fn queue_text(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(text.into()));
    }

    /// Queue a structured response
    pub fn queue_json(&self, value: &Value) {
        self.queue_text(value.to_string());
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Responses still waiting to be consumed
    pub fn pending(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    fn next(&self, request: &LlmRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.next(request).map(LlmResponse::text)
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let text = self.next(request)?;
        let chars: Vec<char> = text.chars().collect();
        let chunks: Vec<Result<String, LlmError>> = chars
            .chunks(self.chunk_chars)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory storage for testing
#[allow(dead_code)]
pub struct InMemoryStorage {
    blocks: Mutex<HashMap<i64, Block>>,
    sessions: Mutex<HashMap<i64, ChatSession>>,
    states: Mutex<HashMap<i64, SessionState>>,
    messages: Mutex<HashMap<i64, Vec<MessagePair>>>,
    next_id: Mutex<i64>,
    fail_state_saves: AtomicBool,
}

#[allow(dead_code)]
impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
            fail_state_saves: AtomicBool::new(false),
        }
    }

    fn allocate_id(&self) -> i64 {
        let mut guard = self.next_id.lock().unwrap();
        let id = *guard;
        *guard += 1;
        id
    }

    /// Store a block under a fresh id and return the id
    pub fn add_block(&self, mut block: Block) -> i64 {
        let id = self.allocate_id();
        block.id = id;
        self.blocks.lock().unwrap().insert(id, block);
        id
    }

    /// Create an idle session for a block and return its id
    pub fn add_session(&self, block_id: i64) -> i64 {
        let id = self.allocate_id();
        let now = Utc::now();
        self.sessions.lock().unwrap().insert(
            id,
            ChatSession {
                id,
                block_id,
                status: SessionStatus::Idle,
                grade: None,
                work_summary: None,
                last_message_id: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn get_block(&self, block_id: i64) -> Option<Block> {
        self.blocks.lock().unwrap().get(&block_id).cloned()
    }

    pub fn get_session(&self, session_id: i64) -> Option<ChatSession> {
        self.sessions.lock().unwrap().get(&session_id).cloned()
    }

    /// Current state for a session
    pub fn get_current_state(&self, session_id: i64) -> Option<SessionState> {
        self.states.lock().unwrap().get(&session_id).cloned()
    }

    /// Make every following state save fail
    pub fn fail_state_saves(&self) {
        self.fail_state_saves.store(true, Ordering::SeqCst);
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStorage {
    async fn load_state(&self, session_id: i64) -> Result<Option<SessionState>, String> {
        Ok(self.get_current_state(session_id))
    }

    async fn save_state(&self, state: &SessionState) -> Result<(), String> {
        if self.fail_state_saves.load(Ordering::SeqCst) {
            return Err("state store unavailable".to_string());
        }
        self.states
            .lock()
            .unwrap()
            .insert(state.session_id, state.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryStorage {
    async fn load_session(&self, session_id: i64) -> Result<Option<ChatSession>, String> {
        Ok(self.get_session(session_id))
    }

    async fn load_block(&self, block_id: i64) -> Result<Option<Block>, String> {
        Ok(self.get_block(block_id))
    }

    async fn update_session_status(
        &self,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), String> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| format!("Session not found: {session_id}"))?;
        if let Some(status) = update.status {
            session.status = status;
        }
        if let Some(grade) = update.grade {
            session.grade = Some(grade);
        }
        if let Some(summary) = &update.work_summary {
            session.work_summary = Some(summary.clone());
        }
        session.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryStorage {
    async fn add_message_pair(
        &self,
        session_id: i64,
        user_text: &str,
        ai_text: &str,
    ) -> Result<MessagePair, String> {
        let id = self.allocate_id();
        let now = Utc::now();
        let mut messages = self.messages.lock().unwrap();
        let pairs = messages.entry(session_id).or_default();
        let prev_id = pairs.last().map_or(0, |p| p.id);
        let sequence_id = pairs.last().map_or(1, |p| p.sequence_id + 1);

        let pair = MessagePair {
            id,
            session_id,
            sequence_id,
            prev_id,
            user_content: json!({"type": "text", "text": user_text, "created_at": now.timestamp_millis()}),
            ai_content: json!([{"text": ai_text, "title": "", "created_at": now.timestamp_millis()}]),
            created_at: now,
        };
        pairs.push(pair.clone());
        drop(messages);

        if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
            session.last_message_id = Some(id);
        }
        Ok(pair)
    }

    async fn get_messages(&self, session_id: i64) -> Result<Vec<MessagePair>, String> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_stream_chunks_text() {
        let llm = MockLlmClient::new();
        llm.queue_text("Привіт, світе");
        let mut stream = llm
            .complete_stream(&LlmRequest::with_instructions("greet"))
            .await
            .unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), "Привіт, світе");
        assert_eq!(llm.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_without_responses_fails() {
        let llm = MockLlmClient::new();
        assert!(llm
            .complete(&LlmRequest::with_instructions("x"))
            .await
            .is_err());
    }
}
