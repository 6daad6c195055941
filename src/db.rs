//! Database module for the tutoring engine
//!
//! Provides persistence for blocks, chat sessions, workflow state and the
//! message pairs exchanged in each session.

mod schema;

pub use schema::*;

use crate::workflow::{Answers, SessionState, WorkflowData, WorkflowStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Block not found: {0}")]
    BlockNotFound(i64),
    #[error("Session not found: {0}")]
    SessionNotFound(i64),
    #[error("Stored state for session {session_id} is unreadable: {reason}")]
    InvalidState { session_id: i64, reason: String },
    #[error("Database connection lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // ==================== Block Operations ====================

    /// Create a new block
    pub fn create_block(&self, block: &NewBlock) -> DbResult<Block> {
        let conn = self.conn()?;
        let specifications = serde_json::to_string(&block.specifications)?;
        let criteria = match &block.eval_criteria {
            Value::Null => None,
            other => Some(serde_json::to_string(other)?),
        };

        conn.execute(
            "INSERT INTO blocks (template_id, specifications, eval_instructions, eval_criteria, model, instructions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                block.template_id,
                specifications,
                block.eval_instructions,
                criteria,
                block.model,
                block.instructions,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(Block {
            id: conn.last_insert_rowid(),
            template_id: block.template_id,
            specifications: block.specifications.clone(),
            eval_instructions: block.eval_instructions.clone(),
            eval_criteria: block.eval_criteria.clone(),
            model: block.model.clone(),
            instructions: block.instructions.clone(),
        })
    }

    /// Get block by ID
    pub fn get_block(&self, id: i64) -> DbResult<Block> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, template_id, specifications, eval_instructions, eval_criteria, model, instructions
             FROM blocks WHERE id = ?1",
            params![id],
            |row| {
                let specifications: String = row.get(2)?;
                let criteria: Option<String> = row.get(4)?;
                Ok(Block {
                    id: row.get(0)?,
                    template_id: row.get(1)?,
                    specifications: decode_value(&specifications),
                    eval_instructions: row.get(3)?,
                    eval_criteria: criteria.as_deref().map_or(Value::Null, decode_value),
                    model: row.get(5)?,
                    instructions: row.get(6)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::BlockNotFound(id),
            other => DbError::Sqlite(other),
        })
    }

    // ==================== Session Operations ====================

    /// Create a new idle session for a block
    pub fn create_session(&self, block_id: i64) -> DbResult<ChatSession> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM blocks WHERE id = ?1)",
            params![block_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DbError::BlockNotFound(block_id));
        }

        let now = Utc::now();
        conn.execute(
            "INSERT INTO sessions (block_id, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![block_id, SessionStatus::Idle.as_str(), now.to_rfc3339()],
        )?;

        Ok(ChatSession {
            id: conn.last_insert_rowid(),
            block_id,
            status: SessionStatus::Idle,
            grade: None,
            work_summary: None,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get session by ID
    pub fn get_session(&self, id: i64) -> DbResult<ChatSession> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, block_id, status, grade, work_summary, last_message_id, created_at, updated_at
             FROM sessions WHERE id = ?1",
            params![id],
            |row| {
                Ok(ChatSession {
                    id: row.get(0)?,
                    block_id: row.get(1)?,
                    status: SessionStatus::parse(&row.get::<_, String>(2)?),
                    grade: row.get(3)?,
                    work_summary: row.get(4)?,
                    last_message_id: row.get(5)?,
                    created_at: parse_datetime(&row.get::<_, String>(6)?),
                    updated_at: parse_datetime(&row.get::<_, String>(7)?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::SessionNotFound(id),
            other => DbError::Sqlite(other),
        })
    }

    /// Apply the fields set in `update`; the rest keep their stored values
    pub fn update_session(&self, id: i64, update: &SessionUpdate) -> DbResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sessions SET
                status = COALESCE(?2, status),
                grade = COALESCE(?3, grade),
                work_summary = COALESCE(?4, work_summary),
                updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                update.status.map(SessionStatus::as_str),
                update.grade,
                update.work_summary,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if updated == 0 {
            return Err(DbError::SessionNotFound(id));
        }
        Ok(())
    }

    // ==================== Workflow State Operations ====================

    /// Load the workflow state of a session, if one was saved
    pub fn load_state(&self, session_id: i64) -> DbResult<Option<SessionState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT block_id, current_index, questions, answers, follow_up_count,
                        max_follow_ups, status, custom_data
                 FROM workflow_states WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(StateRow {
                        block_id: row.get(0)?,
                        current_index: row.get(1)?,
                        questions: row.get(2)?,
                        answers: row.get(3)?,
                        follow_up_count: row.get(4)?,
                        max_follow_ups: row.get(5)?,
                        status: row.get(6)?,
                        custom_data: row.get(7)?,
                    })
                },
            )
            .optional()?;
        drop(conn);

        row.map(|row| row.into_state(session_id)).transpose()
    }

    /// Insert or replace the workflow state of a session
    pub fn save_state(&self, state: &SessionState) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO workflow_states (session_id, block_id, current_index, questions, answers,
                                          follow_up_count, max_follow_ups, status, custom_data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(session_id) DO UPDATE SET
                block_id = excluded.block_id,
                current_index = excluded.current_index,
                questions = excluded.questions,
                answers = excluded.answers,
                follow_up_count = excluded.follow_up_count,
                max_follow_ups = excluded.max_follow_ups,
                status = excluded.status,
                custom_data = excluded.custom_data,
                updated_at = excluded.updated_at",
            params![
                state.session_id,
                state.block_id,
                i64::try_from(state.current_index).unwrap_or(i64::MAX),
                serde_json::to_string(&state.questions)?,
                serde_json::to_string(&state.answers)?,
                state.follow_up_count,
                state.max_follow_ups,
                state.status.as_str(),
                serde_json::to_string(&state.custom_data)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ==================== Message Operations ====================

    /// Record one learner message and its reply, linked to the previous pair
    pub fn add_message_pair(
        &self,
        session_id: i64,
        user_text: &str,
        ai_text: &str,
    ) -> DbResult<MessagePair> {
        let conn = self.conn()?;
        let prev_id: Option<Option<i64>> = conn
            .query_row(
                "SELECT last_message_id FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(prev_id) = prev_id else {
            return Err(DbError::SessionNotFound(session_id));
        };
        let prev_id = prev_id.unwrap_or(0);

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        let now = Utc::now();
        let millis = now.timestamp_millis();
        let user_content = json!({"type": "text", "text": user_text, "created_at": millis});
        let ai_content = json!([{"text": ai_text, "title": "", "created_at": millis}]);

        conn.execute(
            "INSERT INTO messages (session_id, sequence_id, prev_id, user_content, ai_content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                sequence_id,
                prev_id,
                user_content.to_string(),
                ai_content.to_string(),
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        conn.execute(
            "UPDATE sessions SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![session_id, id, now.to_rfc3339()],
        )?;

        Ok(MessagePair {
            id,
            session_id,
            sequence_id,
            prev_id,
            user_content,
            ai_content,
            created_at: now,
        })
    }

    /// Get all message pairs of a session in order
    pub fn get_messages(&self, session_id: i64) -> DbResult<Vec<MessagePair>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, sequence_id, prev_id, user_content, ai_content, created_at
             FROM messages WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let messages = stmt
            .query_map(params![session_id], parse_message_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

/// Raw `workflow_states` columns before decoding
struct StateRow {
    block_id: i64,
    current_index: i64,
    questions: String,
    answers: String,
    follow_up_count: u32,
    max_follow_ups: u32,
    status: String,
    custom_data: String,
}

impl StateRow {
    fn into_state(self, session_id: i64) -> DbResult<SessionState> {
        let invalid = |field: &str, e: serde_json::Error| DbError::InvalidState {
            session_id,
            reason: format!("{field}: {e}"),
        };

        let questions: Vec<Value> =
            decode_json(&self.questions).map_err(|e| invalid("questions", e))?;
        let answers: Answers = decode_json(&self.answers).map_err(|e| invalid("answers", e))?;
        let custom_data: WorkflowData = decode_json(&self.custom_data).unwrap_or_else(|e| {
            tracing::warn!(session_id, error = %e, "Discarding unreadable workflow data");
            WorkflowData::None
        });
        let status = match self.status.as_str() {
            "finished" => WorkflowStatus::Finished,
            _ => WorkflowStatus::Active,
        };

        Ok(SessionState {
            session_id,
            block_id: self.block_id,
            current_index: usize::try_from(self.current_index).unwrap_or(0),
            questions,
            answers,
            follow_up_count: self.follow_up_count,
            max_follow_ups: self.max_follow_ups,
            status,
            custom_data,
        })
    }
}

/// Decode a JSON column that may have been encoded twice
fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    match serde_json::from_str::<T>(raw) {
        Ok(value) => Ok(value),
        Err(e) => match serde_json::from_str::<String>(raw) {
            Ok(inner) => serde_json::from_str(&inner),
            Err(_) => Err(e),
        },
    }
}

/// Loose variant for free-form columns; text that is not JSON is kept as a string
fn decode_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(inner)) => match serde_json::from_str::<Value>(&inner) {
            Ok(nested @ (Value::Array(_) | Value::Object(_))) => nested,
            _ => Value::String(inner),
        },
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}

fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessagePair> {
    Ok(MessagePair {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sequence_id: row.get(2)?,
        prev_id: row.get(3)?,
        user_content: decode_value(&row.get::<_, String>(4)?),
        ai_content: decode_value(&row.get::<_, String>(5)?),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
