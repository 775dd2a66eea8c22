use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// A chat message role, shared verbatim by both dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a possibly-multimodal message content array.
///
/// Only the `text` variant survives normalization (§4.3 "Message normalization");
/// every other part type is coerced to empty text on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// `content` may arrive as a bare string or as an array of parts; either way it is
/// normalized to a single string before being written to the upstream wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Collapse multimodal content to newline-joined text, dropping non-text parts.
    pub fn flatten_to_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Text(value)
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Text(value.to_string())
    }
}

/// A tool-call native to the OAI dialect: arguments are a JSON-encoded string.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OaiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiFunctionCall {
    pub name: String,
    /// JSON-stringified arguments object, per the OAI wire contract.
    pub arguments: String,
}

/// A tool-call native to the OLL dialect: arguments are a JSON object, not a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllToolCall {
    pub function: OllFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllFunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// Dialect-neutral internal form produced by the envelope parser (C1) and consumed
/// by the stream processor (C5) / dialect converter (C3) when synthesizing a native frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedToolCall {
    pub name: String,
    pub arguments: Value,
}

impl ExtractedToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Render into the OAI native shape with a freshly generated call id.
    pub fn into_oai(self, id: String) -> OaiToolCall {
        OaiToolCall {
            id,
            kind: "function".to_string(),
            function: OaiFunctionCall {
                name: self.name,
                arguments: serde_json::to_string(&self.arguments)
                    .unwrap_or_else(|_| "{}".to_string()),
            },
        }
    }

    pub fn into_oll(self) -> OllToolCall {
        OllToolCall {
            function: OllFunctionCall {
                name: self.name,
                arguments: self.arguments,
            },
        }
    }
}

/// A JSON-Schema tool definition, dialect-agnostic (OAI and OLL both nest these
/// under a `function` wrapper on the wire; see `protocols::oai`/`protocols::oll`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}
