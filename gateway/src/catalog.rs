//! Model-catalog cache (C8): a keyed, singleflight-deduplicated cache over
//! the upstream's model list. Not on the hot chat-completion path, but held
//! to the same correctness discipline as the rest of the core.

use std::sync::Arc;

use dashmap::DashMap;
use dg_protocols::Dialect;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::backend::BackendClient;
use crate::error::GatewayError;

/// `(dialect, hashed auth header)` — cache keys never embed a raw token
/// (§4.8 "Cache keys never embed raw auth tokens; always hash").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CatalogKey {
    dialect: Dialect,
    auth_hash: u64,
}

impl CatalogKey {
    fn new(dialect: Dialect, auth_header: Option<&str>) -> Self {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        auth_header.unwrap_or("").hash(&mut hasher);
        Self {
            dialect,
            auth_hash: hasher.finish(),
        }
    }
}

/// Each key owns at most one in-flight fetch; concurrent misses for the same
/// key share its result via the same `OnceCell`.
pub struct ModelCatalogCache {
    entries: DashMap<CatalogKey, Arc<OnceCell<Arc<Value>>>>,
    backend: Arc<BackendClient>,
}

impl ModelCatalogCache {
    pub fn new(backend: Arc<BackendClient>) -> Self {
        Self {
            entries: DashMap::new(),
            backend,
        }
    }

    pub async fn get(&self, dialect: Dialect, auth_header: Option<&str>) -> Result<Arc<Value>, GatewayError> {
        let key = CatalogKey::new(dialect, auth_header);

        let cell = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async { self.fetch(dialect, auth_header).await.map(Arc::new) })
            .await
            .map(Arc::clone);

        match result {
            Ok(value) => Ok(value),
            Err(message) => {
                // No negative caching: drop the entry so the next caller retries.
                self.entries.remove(&key);
                Err(GatewayError::UpstreamTransient(message))
            }
        }
    }

    async fn fetch(&self, dialect: Dialect, auth_header: Option<&str>) -> Result<Value, String> {
        let path = match dialect {
            Dialect::Oai => "/v1/models",
            Dialect::Oll => "/api/tags",
        };
        let mut headers = axum::http::HeaderMap::new();
        if let Some(auth) = auth_header {
            if let Ok(value) = axum::http::HeaderValue::from_str(auth) {
                headers.insert(axum::http::header::AUTHORIZATION, value);
            }
        }
        let resp = self.backend.get(path, &headers).await.map_err(|e| e.to_string())?;
        resp.json::<Value>().await.map_err(|e| e.to_string())
    }
}
