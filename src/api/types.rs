//! API request and response types

use crate::db::MessagePair;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A learner message for a session
#[derive(Debug, Deserialize)]
pub struct StudentMessage {
    #[serde(alias = "ub_id")]
    pub session_id: i64,
    pub content: String,
}

/// Reply to a learner message
#[derive(Debug, Serialize)]
pub struct AssistantResponse {
    pub title: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AssistantResponse {
    pub fn interview(text: String) -> Self {
        Self {
            title: "-".to_string(),
            text,
            kind: "interview".to_string(),
        }
    }
}

/// Request to open a session on a block
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub block_id: i64,
}

/// Service banner for `GET /`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub llm_configured: bool,
    pub default_model: String,
    pub models: Vec<String>,
}

/// Response with the message pairs of a session
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessagePair>,
    pub count: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
