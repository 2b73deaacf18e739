//! Language-model provider layer
//!
//! Defines the canonical request/response model the rest of opsmate speaks,
//! and one adapter per vendor that translates it to and from that vendor's
//! function-calling wire format. Everything outside this crate is
//! provider-agnostic: adding a vendor means adding an adapter here, nothing
//! else changes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Provider call errors. Any of these is fatal for the current turn.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider response decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider rejected the request: {0}")]
    Api(String),

    #[error("no api key configured")]
    NoApiKey,

    #[error("malformed provider response")]
    InvalidResponse,

    #[error("rate limited by provider")]
    RateLimited,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Author of one conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged turn in the canonical request payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Operation declaration advertised to the model: name, description and
/// JSON-Schema parameters, vendor-format-agnostic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A model-proposed invocation of one operation, normalized from whatever the
/// vendor returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Canonical outbound payload
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Empty string means "use the adapter's default model"
    pub model: String,
    /// Standalone system instruction; adapters place it where their vendor
    /// wants it
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderRequest {
    fn default() -> Self {
        Self {
            model: String::new(),
            system: None,
            turns: Vec::new(),
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Token accounting reported by the vendor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Canonical inbound payload after adapter normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub stop_reason: String,
    #[serde(default)]
    pub usage: Usage,
}

impl ProviderResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Natural-language portion of the response, empty string if absent
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            text: Some(content.into()),
            tool_calls: Vec::new(),
            stop_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }
}

/// How consecutive same-role turns are collapsed for a vendor that forbids
/// them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    KeepFirst,
    KeepLast,
}

/// Where a vendor accepts the system instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStyle {
    /// Dedicated top-level field (Anthropic)
    Standalone,
    /// Leading system-role message in the turn list (OpenAI-compatible)
    Inline,
    /// No system representation at all; the builder degrades it to a
    /// prefixed first user turn
    Unsupported,
}

/// Structural constraints a vendor places on the turn sequence. The
/// conversation builder normalizes history against these before any request
/// is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnConstraints {
    pub first_turn_must_be_user: bool,
    pub strict_alternation: bool,
    pub merge: MergeRule,
    pub system: SystemStyle,
}

impl TurnConstraints {
    /// The strictest combination any supported vendor demands. Useful as a
    /// safe default when the vendor is unknown.
    pub fn strictest() -> Self {
        Self {
            first_turn_must_be_user: true,
            strict_alternation: true,
            merge: MergeRule::KeepLast,
            system: SystemStyle::Standalone,
        }
    }
}

/// One language-model vendor
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse>;
    fn constraints(&self) -> TurnConstraints;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
}
