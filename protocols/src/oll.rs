//! Wire types for the OLL dialect: `POST /api/chat`, Ollama-compatible JSON
//! request, JSON or NDJSON response (§3, §6).

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use crate::message::{OllToolCall, Role};
use crate::oai::{OaiFunctionDef, OaiTool};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OllToolCall>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllOptions {
    pub num_predict: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i64>,
    pub repeat_penalty: Option<f64>,
    pub seed: Option<i64>,
    pub mirostat: Option<i64>,
    pub num_ctx: Option<i64>,
}

impl OllOptions {
    pub fn is_empty(&self) -> bool {
        serde_json::to_value(self)
            .map(|v| v.as_object().map(|o| o.is_empty()).unwrap_or(true))
            .unwrap_or(true)
    }
}

/// OLL reuses the `{"type":"function","function":{...}}` tool-definition shape.
pub type OllTool = OaiTool;
pub type OllFunctionDef = OaiFunctionDef;

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OllChatRequest {
    #[validate(length(min = 1, message = "model must not be empty"))]
    pub model: String,
    #[validate(length(min = 1, message = "messages must not be empty"))]
    pub messages: Vec<OllMessage>,
    #[serde(default)]
    pub stream: bool,
    pub format: Option<String>,
    pub options: Option<OllOptions>,
    pub stop: Option<Vec<String>>,
    pub tools: Option<Vec<OllTool>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllChatResponse {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    pub message: OllMessage,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
}

/// OLL streaming chunks vary across upstream implementations: modern ones nest
/// text under `message.content`, older ones put it in a top-level `response`
/// field (§4.5 "Text-delta extraction, per source dialect").
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllChatChunk {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    pub message: Option<OllMessage>,
    pub response: Option<String>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
}

impl OllChatChunk {
    pub fn text_delta(&self) -> Option<&str> {
        self.message
            .as_ref()
            .map(|m| m.content.as_str())
            .filter(|s| !s.is_empty())
            .or(self.response.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllErrorFrame {
    pub error: String,
    pub done: bool,
}

#[cfg(feature = "axum")]
impl crate::validated::Normalizable for OllChatRequest {}
