//! Full-router dispatch: a client POSTs OAI-shaped JSON, the mock upstream
//! (configured as the OAI dialect) answers with a unary OAI response, and the
//! gateway must hand it back unchanged on the fields that round-trip (§8
//! invariant 4).

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use dg_gateway::{build_router, GatewayConfig};
use tower::ServiceExt;

async fn spawn_mock_upstream() -> String {
    let app = axum::Router::new()
        .route(
            "/v1/chat/completions",
            axum::routing::post(|| async {
                axum::Json(serde_json::json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1700000000,
                    "model": "gpt-test",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "hello there"},
                        "finish_reason": "stop",
                    }],
                }))
            }),
        )
        .route(
            "/v1/models",
            axum::routing::get(|| async {
                axum::Json(serde_json::json!({
                    "object": "list",
                    "data": [{"id": "gpt-test", "object": "model"}],
                }))
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn test_config(upstream_url: String) -> Arc<GatewayConfig> {
    Arc::new(GatewayConfig {
        upstream_url,
        upstream_api_key: None,
        upstream_dialect: "oai".into(),
        listen_addr: "0.0.0.0:0".into(),
        reinject_enabled: true,
        reinject_n_msg: 20,
        reinject_n_tok: 4000,
        pass_tools: false,
        window_margin_bytes: 64,
        max_buffer_bytes: 65536,
        request_timeout_secs: 30,
    })
}

#[tokio::test]
async fn oai_client_against_oai_upstream_round_trips_unary_response() {
    let upstream_url = spawn_mock_upstream().await;
    let router = build_router(test_config(upstream_url));

    let request_body = serde_json::json!({
        "model": "gpt-test",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "hello there");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn ollama_client_against_oai_upstream_translates_response_shape() {
    let upstream_url = spawn_mock_upstream().await;
    let router = build_router(test_config(upstream_url));

    let request_body = serde_json::json!({
        "model": "gpt-test",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["message"]["content"], "hello there");
    assert_eq!(body["done"], true);
}

#[tokio::test]
async fn list_models_and_lookup_by_id_go_through_the_catalog_cache() {
    let upstream_url = spawn_mock_upstream().await;
    let router = build_router(test_config(upstream_url));

    let list_response = router
        .clone()
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(list_response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"][0]["id"], "gpt-test");

    let by_id_response = router
        .oneshot(Request::builder().uri("/v1/models/gpt-test").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(by_id_response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(by_id_response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["id"], "gpt-test");
}

#[tokio::test]
async fn unknown_model_id_returns_client_error() {
    let upstream_url = spawn_mock_upstream().await;
    let router = build_router(test_config(upstream_url));

    let response = router
        .oneshot(Request::builder().uri("/v1/models/does-not-exist").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
