//! Database schema and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// SQL schema for initialization
///
/// Structured columns hold JSON text. Older rows may carry JSON that was
/// encoded twice (a JSON string holding JSON); readers accept both.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    template_id INTEGER NOT NULL,
    specifications TEXT NOT NULL DEFAULT '[]',
    eval_instructions TEXT,
    eval_criteria TEXT,
    model TEXT,
    instructions TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    block_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'idle',
    grade REAL,
    work_summary TEXT,
    last_message_id INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (block_id) REFERENCES blocks(id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_block ON sessions(block_id);

CREATE TABLE IF NOT EXISTS workflow_states (
    session_id INTEGER PRIMARY KEY,
    block_id INTEGER NOT NULL,
    current_index INTEGER NOT NULL DEFAULT 0,
    questions TEXT NOT NULL,
    answers TEXT NOT NULL,
    follow_up_count INTEGER NOT NULL DEFAULT 0,
    max_follow_ups INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    custom_data TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    sequence_id INTEGER NOT NULL,
    prev_id INTEGER NOT NULL DEFAULT 0,
    user_content TEXT NOT NULL,
    ai_content TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, sequence_id);
";

/// Teaching configuration a session runs against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    /// Selects the workflow
    pub template_id: i64,
    /// Specification records, or JSON text holding them
    pub specifications: Value,
    pub eval_instructions: Option<String>,
    /// Criteria list, JSON text holding one, or null when not configured
    pub eval_criteria: Value,
    /// Generation model; the configured default when absent
    pub model: Option<String>,
    /// Free-form instructions for the custom workflow
    pub instructions: Option<String>,
}

/// Fields for a new block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBlock {
    pub template_id: i64,
    #[serde(default)]
    pub specifications: Value,
    #[serde(default)]
    pub eval_instructions: Option<String>,
    #[serde(default)]
    pub eval_criteria: Value,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Lifecycle of a chat session as recorded upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Started,
    Finished,
    Blocked,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Started => "started",
            SessionStatus::Finished => "finished",
            SessionStatus::Blocked => "blocked",
        }
    }

    /// Unknown values read as idle
    pub fn parse(s: &str) -> Self {
        match s {
            "started" => SessionStatus::Started,
            "finished" => SessionStatus::Finished,
            "blocked" => SessionStatus::Blocked,
            _ => SessionStatus::Idle,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: i64,
    pub block_id: i64,
    pub status: SessionStatus,
    pub grade: Option<f64>,
    pub work_summary: Option<String>,
    pub last_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// An evaluation has already been stored for this session
    pub fn has_evaluation(&self) -> bool {
        self.grade.is_some() || self.work_summary.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Partial session update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub grade: Option<f64>,
    pub work_summary: Option<String>,
}

/// One learner message and the reply it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePair {
    pub id: i64,
    pub session_id: i64,
    pub sequence_id: i64,
    /// Id of the previous pair in the session, 0 for the first
    pub prev_id: i64,
    pub user_content: Value,
    pub ai_content: Value,
    pub created_at: DateTime<Utc>,
}
