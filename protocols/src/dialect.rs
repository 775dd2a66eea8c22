use std::fmt;
use std::str::FromStr;

/// A wire protocol for chat completion: OpenAI-style JSON+SSE, or Ollama-style JSON+NDJSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// OpenAI-compatible `/v1/chat/completions`: SSE framing, `data: <json>` lines, `[DONE]`.
    Oai,
    /// Ollama-compatible `/api/chat`: newline-delimited JSON, terminal frame has `done: true`.
    Oll,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Oai => "oai",
            Dialect::Oll => "oll",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = DialectParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oai" | "openai" => Ok(Dialect::Oai),
            "oll" | "ollama" => Ok(Dialect::Oll),
            other => Err(DialectParseError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized dialect: {0:?}")]
pub struct DialectParseError(String);
