//! Wire types for the OAI dialect: `POST /v1/chat/completions`, OpenAI-compatible
//! JSON request, JSON or SSE response (§3, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use validator::Validate;

use crate::message::{Content, OaiToolCall, Role, ToolSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OaiStop {
    One(String),
    Many(Vec<String>),
}

impl OaiStop {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OaiStop::One(s) => vec![s],
            OaiStop::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiFunctionDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OaiFunctionDef,
}

impl From<&ToolSpec> for OaiTool {
    fn from(spec: &ToolSpec) -> Self {
        OaiTool {
            kind: "function".to_string(),
            function: OaiFunctionDef {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OaiToolChoice {
    Mode(String),
    Named { r#type: String, function: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OaiChatRequest {
    #[validate(length(min = 1, message = "model must not be empty"))]
    pub model: String,
    #[validate(length(min = 1, message = "messages must not be empty"))]
    pub messages: Vec<OaiMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: Option<i64>,
    pub stop: Option<OaiStop>,
    #[serde(default)]
    pub stream: bool,
    pub n: Option<u32>,
    pub tools: Option<Vec<OaiTool>>,
    pub tool_choice: Option<OaiToolChoice>,
    pub functions: Option<Value>,
    pub function_call: Option<Value>,
    pub response_format: Option<OaiResponseFormat>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub logit_bias: Option<serde_json::Map<String, Value>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiChoice {
    pub index: u32,
    pub message: OaiMessage,
    pub finish_reason: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OaiChoice>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OaiDelta {
    pub role: Option<Role>,
    pub content: Option<Value>,
    pub tool_calls: Option<Vec<OaiDeltaToolCall>>,
}

/// Streaming tool-call deltas carry an `index` and may omit fields across chunks;
/// arguments stream as partial JSON-string fragments on native-tool-call backends.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiDeltaToolCall {
    pub index: u32,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub function: Option<crate::message::OaiFunctionCall>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiStreamChoice {
    pub index: u32,
    pub delta: OaiDelta,
    pub finish_reason: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiChatChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OaiStreamChoice>,
}

#[cfg(feature = "axum")]
impl crate::validated::Normalizable for OaiChatRequest {}
