//! S6: backend returns 503 on the first attempt, 200 on the second; the
//! client must receive the 200 body and the upstream must see exactly two
//! POSTs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use dg_gateway::backend::BackendClient;
use serde_json::json;

#[derive(Clone)]
struct Counter(Arc<AtomicUsize>);

async fn flaky_handler(State(counter): State<Counter>) -> impl IntoResponse {
    let attempt = counter.0.fetch_add(1, Ordering::SeqCst);
    if attempt == 0 {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "temporarily unavailable").into_response()
    } else {
        Json(json!({"ok": true})).into_response()
    }
}

async fn spawn_mock() -> (String, Counter) {
    let counter = Counter(Arc::new(AtomicUsize::new(0)));
    let app = Router::new()
        .route("/v1/chat/completions", post(flaky_handler))
        .with_state(counter.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), counter)
}

#[tokio::test]
async fn retries_once_on_503_then_succeeds() {
    let (base_url, counter) = spawn_mock().await;
    let client = BackendClient::new(base_url, None, Duration::from_secs(5));

    let resp = client
        .send(
            "/v1/chat/completions",
            &json!({"model": "m", "messages": []}),
            &axum::http::HeaderMap::new(),
            false,
        )
        .await
        .expect("should succeed after retry");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(counter.0.load(Ordering::SeqCst), 2);
}
