//! Trait abstractions for runtime I/O
//!
//! These traits enable testing workflows and the session runtime with mock
//! implementations.

use crate::db::{Block, ChatSession, Database, DbError, MessagePair, SessionUpdate};
use crate::llm::{LlmError, LlmRequest, LlmResponse, ModelRegistry, TextStream};
use crate::workflow::SessionState;
use async_trait::async_trait;
use std::sync::Arc;

/// Storage for workflow state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the session's state; `None` when none was saved yet
    async fn load_state(&self, session_id: i64) -> Result<Option<SessionState>, String>;

    /// Insert or replace the session's state
    async fn save_state(&self, state: &SessionState) -> Result<(), String>;
}

/// Storage for blocks and session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, session_id: i64) -> Result<Option<ChatSession>, String>;

    async fn load_block(&self, block_id: i64) -> Result<Option<Block>, String>;

    /// Apply a partial update to the session record
    async fn update_session_status(
        &self,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), String>;
}

/// Storage for the message pairs of a session
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn add_message_pair(
        &self,
        session_id: i64,
        user_text: &str,
        ai_text: &str,
    ) -> Result<MessagePair, String>;

    async fn get_messages(&self, session_id: i64) -> Result<Vec<MessagePair>, String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete an LLM request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Stream an LLM response as text fragments
    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError>;
}

/// Combined storage trait for convenience
pub trait Storage: StateStore + SessionStore + MessageStore {}
impl<T: StateStore + SessionStore + MessageStore> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    async fn load_state(&self, session_id: i64) -> Result<Option<SessionState>, String> {
        (**self).load_state(session_id).await
    }

    async fn save_state(&self, state: &SessionState) -> Result<(), String> {
        (**self).save_state(state).await
    }
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn load_session(&self, session_id: i64) -> Result<Option<ChatSession>, String> {
        (**self).load_session(session_id).await
    }

    async fn load_block(&self, block_id: i64) -> Result<Option<Block>, String> {
        (**self).load_block(block_id).await
    }

    async fn update_session_status(
        &self,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), String> {
        (**self).update_session_status(session_id, update).await
    }
}

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn add_message_pair(
        &self,
        session_id: i64,
        user_text: &str,
        ai_text: &str,
    ) -> Result<MessagePair, String> {
        (**self)
            .add_message_pair(session_id, user_text, ai_text)
            .await
    }

    async fn get_messages(&self, session_id: i64) -> Result<Vec<MessagePair>, String> {
        (**self).get_messages(session_id).await
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        (**self).complete_stream(request).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Map not-found errors to `None` for the optional lookups
fn found<T>(result: Result<T, DbError>) -> Result<Option<T>, String> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(DbError::SessionNotFound(_) | DbError::BlockNotFound(_)) => Ok(None),
        Err(e) => Err(e.to_string()),
    }
}

#[async_trait]
impl StateStore for DatabaseStorage {
    async fn load_state(&self, session_id: i64) -> Result<Option<SessionState>, String> {
        self.db.load_state(session_id).map_err(|e| e.to_string())
    }

    async fn save_state(&self, state: &SessionState) -> Result<(), String> {
        self.db.save_state(state).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SessionStore for DatabaseStorage {
    async fn load_session(&self, session_id: i64) -> Result<Option<ChatSession>, String> {
        found(self.db.get_session(session_id))
    }

    async fn load_block(&self, block_id: i64) -> Result<Option<Block>, String> {
        found(self.db.get_block(block_id))
    }

    async fn update_session_status(
        &self,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), String> {
        self.db
            .update_session(session_id, update)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl MessageStore for DatabaseStorage {
    async fn add_message_pair(
        &self,
        session_id: i64,
        user_text: &str,
        ai_text: &str,
    ) -> Result<MessagePair, String> {
        self.db
            .add_message_pair(session_id, user_text, ai_text)
            .map_err(|e| e.to_string())
    }

    async fn get_messages(&self, session_id: i64) -> Result<Vec<MessagePair>, String> {
        self.db.get_messages(session_id).map_err(|e| e.to_string())
    }
}

/// Adapter to use `ModelRegistry` as `LlmClient`
///
/// Requests are routed by their `model` field; unknown or absent models fall
/// back to the registry default.
pub struct RegistryLlmClient {
    registry: Arc<ModelRegistry>,
}

impl RegistryLlmClient {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    fn service(&self, request: &LlmRequest) -> Result<Arc<dyn crate::llm::LlmService>, LlmError> {
        request
            .model
            .as_deref()
            .and_then(|model| self.registry.get(model))
            .or_else(|| self.registry.default())
            .ok_or_else(|| LlmError::network("No LLM available"))
    }
}

#[async_trait]
impl LlmClient for RegistryLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.service(request)?.complete(request).await
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        self.service(request)?.complete_stream(request).await
    }
}
