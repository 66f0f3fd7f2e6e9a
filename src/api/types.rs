//! API request and response types

use crate::bot::BotReply;
use crate::db::WorkflowRef;
use crate::session::Turn;
use serde::{Deserialize, Serialize};

/// A chat message or command
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

/// An uploaded workflow file
#[derive(Debug, Deserialize)]
pub struct DocumentRequest {
    pub file_name: String,
    pub content_base64: String,
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub reply: BotReply,
}

/// Conversation history, oldest first
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub active: Option<WorkflowRef>,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowListResponse {
    pub workflows: Vec<WorkflowRef>,
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
