//! Error taxonomy and wire-shape conversion (§7 "Error Handling Design").
//!
//! Each variant maps to one of the spec's five error kinds and renders as the
//! dialect-appropriate unary or streaming frame shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use dg_protocols::Dialect;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    ClientInvalid(String),
    #[error("upstream error ({status}): {body}")]
    UpstreamFatal { status: StatusCode, body: String },
    #[error("upstream unreachable after retries: {0}")]
    UpstreamTransient(String),
    #[error("conversion failed: {0}")]
    Conversion(String),
    #[error("stream cancelled")]
    StreamCancelled,
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::ClientInvalid(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamFatal { status, .. } => *status,
            GatewayError::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Conversion(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::StreamCancelled => StatusCode::OK,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GatewayError::ClientInvalid(_) => "invalid_request",
            GatewayError::UpstreamFatal { .. } => "upstream_error",
            GatewayError::UpstreamTransient(_) => "upstream_unavailable",
            GatewayError::Conversion(_) => "conversion_error",
            GatewayError::StreamCancelled => "stream_cancelled",
        }
    }

    fn message(&self) -> String {
        match self {
            GatewayError::UpstreamFatal { body, .. } => sanitize_error_body(body),
            other => other.to_string(),
        }
    }

    /// Render as a unary (non-streaming) JSON error body in the given dialect.
    pub fn to_unary_response(&self, dialect: Dialect) -> Response {
        let status = self.status();
        let body = match dialect {
            Dialect::Oai => json!({
                "object": "error",
                "message": self.message(),
                "type": self.code(),
                "code": Value::Null,
                "param": Value::Null,
            }),
            Dialect::Oll => json!({
                "error": self.message(),
                "done": true,
            }),
        };
        (status, Json(body)).into_response()
    }

    /// Render as a single terminal streaming frame in the given dialect, per
    /// §7's error-frame shapes. The caller is responsible for appending the
    /// dialect's own stream terminator after this frame (OAI: `[DONE]`).
    pub fn to_stream_frame(&self, dialect: Dialect) -> String {
        match dialect {
            Dialect::Oai => {
                let body = json!({"error": {"message": self.message(), "code": self.code()}});
                format!("data: {}\n\n", body)
            }
            Dialect::Oll => {
                let body = json!({"error": self.message(), "code": self.code(), "done": true});
                format!("{}\n", body)
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.to_unary_response(Dialect::Oai)
    }
}

static ORG_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\borganization org-\S+").unwrap());
static PROJ_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\bproject proj_\S+").unwrap());
static BEARER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Bearer\s+\S+").unwrap());

/// Strip identifiers that shouldn't leak to clients from an upstream error body.
/// Non-JSON bodies still get bearer-token redaction applied and otherwise pass
/// through unchanged.
pub fn sanitize_error_body(body: &str) -> String {
    let redacted = BEARER_RE.replace_all(body, "Bearer [REDACTED]");

    let Ok(mut json) = serde_json::from_str::<Value>(&redacted) else {
        return redacted.into_owned();
    };

    let mut modified = false;
    if let Some(error) = json.get_mut("error").and_then(Value::as_object_mut) {
        if let Some(Value::String(msg)) = error.get("message") {
            let sanitized = ORG_ID_RE.replace_all(msg, "");
            let sanitized = PROJ_ID_RE.replace_all(&sanitized, "");
            if sanitized.as_ref() != msg.as_str() {
                error.insert("message".into(), Value::String(sanitized.into_owned()));
                modified = true;
            }
        }
    }

    if modified {
        serde_json::to_string(&json).unwrap_or_else(|_| redacted.into_owned())
    } else {
        redacted.into_owned()
    }
}
