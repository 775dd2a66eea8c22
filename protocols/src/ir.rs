//! The dialect-neutral intermediate representation (IR) that request/response/chunk
//! conversion passes through on its way from one wire dialect to the other.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ExtractedToolCall, Role, ToolSpec};

/// One message in the neutral form: content has already been flattened to a single
/// string (§3 "Invariant: after normalization, `content` on the wire to upstream is
/// a single string").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ExtractedToolCall>>,
}

impl NeutralMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    Json,
}

impl Default for ResponseFormat {
    fn default() -> Self {
        ResponseFormat::Text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named(String),
}

/// Per-dialect leftover fields that have no neutral-field counterpart but must
/// round-trip within a single dialect. Modeled as a tagged union over the two
/// known dialects rather than a free-form map (see SPEC_FULL.md §9 design notes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "dialect", rename_all = "lowercase")]
pub enum Extensions {
    #[default]
    None,
    Oai(OaiExtension),
    Oll(OllExtension),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OaiExtension {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllExtension {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<i64>,
}

/// Neutral request IR: the union of OAI and OLL request semantics (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralRequest {
    pub model: String,
    pub messages: Vec<NeutralMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    pub response_format: ResponseFormat,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default)]
    pub extensions: Extensions,
}

impl NeutralRequest {
    /// The set of tool names declared on this request — the detector's sole
    /// allowlist for XML root tags (§3 "Known-tool set").
    pub fn known_tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }
}

/// Neutral, non-streaming response IR (§4.3 "Response conversion").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub model: String,
    pub message: NeutralMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
}

/// Neutral streaming chunk IR (§4.3, §4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeutralChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ExtractedToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tool_names_collects_declared_tools() {
        let req = NeutralRequest {
            model: "m".into(),
            messages: vec![],
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            repetition_penalty: None,
            seed: None,
            stop: vec![],
            tools: vec![ToolSpec {
                name: "search".into(),
                description: None,
                parameters: Value::Null,
            }],
            tool_choice: None,
            response_format: ResponseFormat::Text,
            stream: false,
            n: None,
            extensions: Extensions::None,
        };
        assert_eq!(req.known_tool_names(), vec!["search".to_string()]);
    }
}
