//! HTTP surface (C9): binds the inbound routes named in §6 and wires each
//! to the request pipeline for its dialect.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dg_protocols::validated::ValidatedJson;
use dg_protocols::Dialect;
use tower_http::trace::TraceLayer;
use tracing::info_span;
use uuid::Uuid;

use crate::backend::BackendClient;
use crate::catalog::ModelCatalogCache;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::pipeline::{ConversionContext, GatewayPipeline, RequestState};

pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub pipeline: Arc<GatewayPipeline>,
    pub catalog: Arc<ModelCatalogCache>,
    pub backend: Arc<BackendClient>,
}

pub fn build_router(config: Arc<GatewayConfig>) -> Router {
    let backend = Arc::new(BackendClient::new(
        config.upstream_url.clone(),
        config.upstream_api_key.clone(),
        config.request_timeout(),
    ));
    let pipeline = Arc::new(GatewayPipeline::new(&config, backend.clone()));
    let catalog = Arc::new(ModelCatalogCache::new(backend.clone()));
    let state = Arc::new(AppState {
        config,
        pipeline,
        catalog,
        backend,
    });

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/api/chat", post(api_chat))
        .route("/v1/models", get(list_oai_models))
        .route("/v1/models/{id}", get(get_oai_model))
        .route("/api/tags", get(list_oll_tags))
        .route("/api/show", post(show_oll_model))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
            info_span!("request", method = %req.method(), path = %req.uri().path(), request_id = %Uuid::new_v4())
        }))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    ValidatedJson(req): ValidatedJson<dg_protocols::oai::OaiChatRequest>,
) -> Response {
    let neutral = dg_convert::oai_request_to_neutral(req);
    dispatch(&state, neutral, headers, Dialect::Oai).await
}

async fn api_chat(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    ValidatedJson(req): ValidatedJson<dg_protocols::oll::OllChatRequest>,
) -> Response {
    let neutral = dg_convert::oll_request_to_neutral(req);
    dispatch(&state, neutral, headers, Dialect::Oll).await
}

/// The four catalog routes are delegated to the upstream's own model-listing
/// surface (§6); the core's job is the cache contract, not inventing a schema.
fn auth_header(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()
}

async fn list_oai_models(State(state): State<Arc<AppState>>, headers: axum::http::HeaderMap) -> Response {
    match state.catalog.get(Dialect::Oai, auth_header(&headers)).await {
        Ok(value) => Json((*value).clone()).into_response(),
        Err(e) => e.to_unary_response(Dialect::Oai),
    }
}

async fn get_oai_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: axum::http::HeaderMap,
) -> Response {
    let catalog = match state.catalog.get(Dialect::Oai, auth_header(&headers)).await {
        Ok(value) => value,
        Err(e) => return e.to_unary_response(Dialect::Oai),
    };
    let entry = catalog
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|entries| entries.iter().find(|e| e.get("id").and_then(|v| v.as_str()) == Some(id.as_str())));
    match entry {
        Some(model) => Json(model.clone()).into_response(),
        None => GatewayError::ClientInvalid(format!("unknown model: {id}")).to_unary_response(Dialect::Oai),
    }
}

async fn list_oll_tags(State(state): State<Arc<AppState>>, headers: axum::http::HeaderMap) -> Response {
    match state.catalog.get(Dialect::Oll, auth_header(&headers)).await {
        Ok(value) => Json((*value).clone()).into_response(),
        Err(e) => e.to_unary_response(Dialect::Oll),
    }
}

async fn show_oll_model(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    match state.backend.send("/api/show", &body, &headers, false).await {
        Ok(resp) => match resp.json::<serde_json::Value>().await {
            Ok(value) => Json(value).into_response(),
            Err(e) => GatewayError::Conversion(e.to_string()).to_unary_response(Dialect::Oll),
        },
        Err(e) => e.to_unary_response(Dialect::Oll),
    }
}

async fn dispatch(
    state: &AppState,
    neutral: dg_protocols::ir::NeutralRequest,
    headers: axum::http::HeaderMap,
    client_dialect: Dialect,
) -> Response {
    let backend_dialect = match state.config.upstream_dialect() {
        Ok(d) => d,
        Err(e) => return GatewayError::Conversion(e.to_string()).to_unary_response(client_dialect),
    };

    let context = ConversionContext {
        source_dialect: client_dialect,
        target_dialect: backend_dialect,
        known_tool_names: HashSet::new(),
        request_id: Uuid::new_v4().to_string(),
    };

    let request_state = RequestState {
        neutral,
        client_headers: headers,
        context,
        response: None,
    };

    state.pipeline.execute(request_state).await
}
