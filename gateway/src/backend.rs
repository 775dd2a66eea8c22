//! Backend HTTP client (C4.6): sends the already-converted, target-dialect
//! payload upstream, retrying transient failures per [`RetryPolicy`] and
//! redacting credentials before anything reaches the log.

use std::time::Duration;

use axum::http::HeaderMap;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::retry::RetryPolicy;

/// Headers a client may send that are meaningful to forward upstream.
/// Everything else (cookies, routing headers, host) is dropped.
pub fn should_propagate_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("accept")
}

pub struct BackendClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    retry_policy: RetryPolicy,
}

impl BackendClient {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder should not fail with no custom TLS config");
        Self {
            http,
            base_url,
            api_key,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// POST `path` with `body`, retrying per policy. `streaming` controls the
    /// `Accept` header sent upstream (§6 "OAI upstream").
    pub async fn send(
        &self,
        path: &str,
        body: &serde_json::Value,
        client_headers: &HeaderMap,
        streaming: bool,
    ) -> Result<Response, GatewayError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        self.execute(&url, || {
            let mut req = self.http.post(&url).json(body);
            req = apply_forwarded_headers(req, client_headers, self.api_key.as_deref());
            if streaming {
                req = req.header(reqwest::header::ACCEPT, "text/event-stream");
            }
            req
        })
        .await
    }

    /// GET `path`, retrying per policy. Used by the model-catalog handlers,
    /// which have no request body to forward.
    pub async fn get(&self, path: &str, client_headers: &HeaderMap) -> Result<Response, GatewayError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        self.execute(&url, || {
            let req = self.http.get(&url);
            apply_forwarded_headers(req, client_headers, self.api_key.as_deref())
        })
        .await
    }

    async fn execute(
        &self,
        url: &str,
        build_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Response, GatewayError> {
        let mut attempt = 0u32;

        loop {
            let req = build_request();
            debug!(url = %redact_url(url), attempt, "sending backend request");

            match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let retry_after = parse_retry_after(&resp);
                    if let Some(delay) = self.retry_policy.decide(attempt, Some(status.as_u16()), retry_after) {
                        warn!(status = %status, attempt, delay_ms = delay.as_millis() as u64, "retrying backend request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(GatewayError::UpstreamFatal { status, body: body_text });
                }
                Err(err) => {
                    if let Some(delay) = self.retry_policy.decide(attempt, None, None) {
                        warn!(error = %redact_secrets(&err.to_string()), attempt, "retrying after transport error");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(GatewayError::UpstreamTransient(redact_secrets(&err.to_string())));
                }
            }
        }
    }
}

fn apply_forwarded_headers(
    mut req: reqwest::RequestBuilder,
    client_headers: &HeaderMap,
    configured_api_key: Option<&str>,
) -> reqwest::RequestBuilder {
    for (name, value) in client_headers.iter() {
        if should_propagate_header(name.as_str()) {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                req = req.header(name, value);
            }
        }
    }
    if !client_headers.contains_key(AUTHORIZATION.as_str()) {
        if let Some(key) = configured_api_key {
            req = req.bearer_auth(key);
        }
    }
    req
}

fn parse_retry_after(resp: &Response) -> Option<u64> {
    if resp.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

fn redact_secrets(message: &str) -> String {
    crate::error::sanitize_error_body(message)
}
