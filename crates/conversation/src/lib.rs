//! Conversation history model
//!
//! The durable, chronological record of a dashboard conversation. The
//! orchestration core receives a bounded slice of these messages and returns
//! new ones to append; persistence belongs to the caller. Provider quirks
//! never leak in here: whatever shape a vendor demanded for one request, the
//! stored history keeps true chronological order.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod builder;

pub use builder::RequestBuilder;
pub use opsmate_provider::Role;

/// One turn of a stored conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
    /// Arbitrary result payload attached to an assistant answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
    /// Request id of an approval this message is waiting on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_request: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
            structured_data: None,
            pending_request: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_structured_data(mut self, data: Value) -> Self {
        self.structured_data = Some(data);
        self
    }

    pub fn with_pending_request(mut self, request_id: impl Into<String>) -> Self {
        self.pending_request = Some(request_id.into());
        self
    }
}

/// Ordered message sequence plus conversation-level metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Local::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Local::now();
    }

    /// Most recent `n` messages, oldest first
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
