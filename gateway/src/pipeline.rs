//! Request pipeline (C7): a trait-based staged pipeline where each stage
//! performs one part of request processing and can short-circuit with an
//! early response, mirroring the stage-order discipline of a production
//! translating proxy.
//!
//! Stage order: tool extraction -> prompt injection -> backend dispatch
//! (which itself performs the target-dialect request conversion, calls the
//! backend, and — for unary responses — the response conversion).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dg_protocols::ir::NeutralRequest;
use dg_protocols::Dialect;

use crate::backend::BackendClient;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::stream_processor::StreamProcessor;

/// Per-request conversion context, built once and never mutated after the
/// tool set is known (§3 "ConversionContext").
pub struct ConversionContext {
    pub source_dialect: Dialect,
    pub target_dialect: Dialect,
    pub known_tool_names: HashSet<String>,
    pub request_id: String,
}

/// Request-direction state: `context.source_dialect` is the client's dialect,
/// `context.target_dialect` is the configured backend's dialect. Response
/// conversion reuses the same context with the two roles swapped.
pub struct RequestState {
    pub neutral: NeutralRequest,
    pub client_headers: HeaderMap,
    pub context: ConversionContext,
    pub response: Option<Response>,
}

pub type StageResult = Result<Option<Response>, Response>;

#[async_trait]
pub trait PipelineStage: Send + Sync {
    async fn execute(&self, state: &mut RequestState) -> StageResult;
    fn name(&self) -> &'static str;
}

struct ToolExtractionStage;

#[async_trait]
impl PipelineStage for ToolExtractionStage {
    async fn execute(&self, state: &mut RequestState) -> StageResult {
        state.context.known_tool_names = state.neutral.known_tool_names().into_iter().collect();
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "tool_extraction"
    }
}

struct PromptInjectionStage {
    reinject_policy: dg_convert::ReinjectionPolicy,
}

#[async_trait]
impl PipelineStage for PromptInjectionStage {
    async fn execute(&self, state: &mut RequestState) -> StageResult {
        if state.neutral.tools.is_empty() {
            return Ok(None);
        }
        dg_convert::inject_instructions(&mut state.neutral.messages, &state.neutral.tools);
        dg_convert::maybe_reinject(&mut state.neutral.messages, &state.neutral.tools, &self.reinject_policy);
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "prompt_injection"
    }
}

struct BackendDispatchStage {
    backend: Arc<BackendClient>,
    pass_tools: bool,
}

#[async_trait]
impl PipelineStage for BackendDispatchStage {
    async fn execute(&self, state: &mut RequestState) -> StageResult {
        let streaming = state.neutral.stream;
        let (path, body) = build_backend_request(&state.neutral, state.context.target_dialect, self.pass_tools);

        let resp = self
            .backend
            .send(&path, &body, &state.client_headers, streaming)
            .await
            .map_err(|e| e.to_unary_response(state.context.source_dialect))?;

        if streaming {
            state.response = Some(build_streaming_response(resp, &state.neutral, &state.context).await);
        } else {
            state.response = Some(build_unary_response(resp, &state.neutral, &state.context).await?);
        }
        Ok(state.response.take().map(Some).unwrap_or(None))
    }

    fn name(&self) -> &'static str {
        "backend_dispatch"
    }
}

fn build_backend_request(
    neutral: &NeutralRequest,
    backend_dialect: Dialect,
    pass_tools: bool,
) -> (String, serde_json::Value) {
    match backend_dialect {
        Dialect::Oai => (
            "/v1/chat/completions".to_string(),
            serde_json::to_value(dg_convert::neutral_to_oai_request(neutral, pass_tools))
                .unwrap_or(serde_json::Value::Null),
        ),
        Dialect::Oll => (
            "/api/chat".to_string(),
            serde_json::to_value(dg_convert::neutral_to_oll_request(neutral, pass_tools))
                .unwrap_or(serde_json::Value::Null),
        ),
    }
}

async fn build_unary_response(
    resp: reqwest::Response,
    neutral: &NeutralRequest,
    ctx: &ConversionContext,
) -> Result<Response, Response> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    let mut neutral_response = match ctx.target_dialect {
        Dialect::Oai => {
            let parsed: dg_protocols::oai::OaiChatResponse = serde_json::from_str(&body)
                .map_err(|e| GatewayError::Conversion(e.to_string()).to_unary_response(ctx.source_dialect))?;
            dg_convert::oai_response_to_neutral(parsed)
        }
        Dialect::Oll => {
            let parsed: dg_protocols::oll::OllChatResponse = serde_json::from_str(&body)
                .map_err(|e| GatewayError::Conversion(e.to_string()).to_unary_response(ctx.source_dialect))?;
            dg_convert::oll_response_to_neutral(parsed)
        }
    };

    dg_convert::apply_envelope_extraction(&mut neutral_response, &ctx.known_tool_names);
    neutral_response.model = neutral.model.clone();

    let out = match ctx.source_dialect {
        Dialect::Oai => serde_json::to_value(dg_convert::neutral_to_oai_response(&neutral_response)),
        Dialect::Oll => serde_json::to_value(dg_convert::neutral_to_oll_response(&neutral_response)),
    }
    .unwrap_or(serde_json::Value::Null);

    let _ = status;
    Ok(Json(out).into_response())
}

async fn build_streaming_response(
    resp: reqwest::Response,
    neutral: &NeutralRequest,
    ctx: &ConversionContext,
) -> Response {
    use axum::body::Body;
    use futures::StreamExt;

    let processor = StreamProcessor::new(
        ctx.target_dialect,
        ctx.source_dialect,
        ctx.known_tool_names.clone(),
        uuid::Uuid::new_v4().to_string(),
        neutral.model.clone(),
        0,
    );

    let byte_stream = resp.bytes_stream().boxed();
    let out_stream = processor.drive(byte_stream);
    let body = Body::from_stream(out_stream);

    let content_type = match ctx.source_dialect {
        Dialect::Oai => "text/event-stream",
        Dialect::Oll => "application/x-ndjson",
    };

    Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, content_type)
        .header(axum::http::header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| GatewayError::Conversion("failed to build streaming response".into()).into_response())
}

pub struct GatewayPipeline {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl GatewayPipeline {
    pub fn new(config: &GatewayConfig, backend: Arc<BackendClient>) -> Self {
        let reinject_policy = dg_convert::ReinjectionPolicy {
            enabled: config.reinject_enabled,
            n_msg: config.reinject_n_msg,
            n_tok: config.reinject_n_tok,
        };
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(ToolExtractionStage),
            Box::new(PromptInjectionStage { reinject_policy }),
            Box::new(BackendDispatchStage {
                backend,
                pass_tools: config.pass_tools,
            }),
        ];
        Self { stages }
    }

    pub async fn execute(&self, mut state: RequestState) -> Response {
        for stage in &self.stages {
            match stage.execute(&mut state).await {
                Ok(Some(response)) => return response,
                Ok(None) => continue,
                Err(response) => return response,
            }
        }
        GatewayError::Conversion("pipeline completed without producing a response".into())
            .to_unary_response(state.context.source_dialect)
    }
}
