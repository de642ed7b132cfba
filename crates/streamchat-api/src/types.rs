use serde::{Deserialize, Serialize};

use streamchat_core::{FinishReason, History, ParameterOverrides};

// ─── Shared ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

// ─── Legacy /chat and /stream_chat ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub history: Option<History>,
    pub max_input_length: Option<usize>,
    pub max_generate_length: Option<usize>,
    pub top_p: Option<f64>,
    pub temperature: Option<f64>,
}

impl LegacyChatRequest {
    pub fn overrides(&self) -> ParameterOverrides {
        ParameterOverrides {
            max_input_length: self.max_input_length,
            max_generate_length: self.max_generate_length,
            top_p: self.top_p,
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LegacyChatResponse {
    pub response: String,
    pub history: History,
    pub status: u16,
    pub time: String,
}

/// JSON payload of every `/stream_chat` event.
#[derive(Debug, Clone, Serialize)]
pub struct StreamChatPayload {
    pub response: String,
    pub history: History,
    pub finish: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─── OpenAI chat completions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    /// Total sequence budget; `max_tokens` is accepted for OpenAI clients.
    #[serde(alias = "max_tokens")]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

// ── Streaming chat completions (SSE delta) ─────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamingChatChoice {
    pub index: u32,
    pub delta: ChatDelta,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<StreamingChatChoice>,
}

// ── Models ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    pub root: Option<String>,
    pub parent: Option<String>,
    pub permission: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelObject>,
}
