use crate::http::build_client;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

/// One persisted visibility check: a row per SKU per run, whatever the
/// outcome was.
#[derive(Debug, Clone, Serialize)]
pub struct VisibilityAudit {
    pub account: String,
    pub sku_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ean: Option<String>,
    pub visible: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("request failed: {0}")]
    Request(String),
}

/// REST sink for visibility audit rows. Optional: without the env pair the
/// pipeline simply skips persistence.
#[derive(Debug, Clone)]
pub struct AuditStore {
    base_url: String,
    service_key: String,
    http: Client,
}

impl AuditStore {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("AUDIT_STORE_URL").ok()?;
        let service_key = std::env::var("AUDIT_STORE_SERVICE_KEY")
            .or_else(|_| std::env::var("AUDIT_STORE_KEY"))
            .ok()?;
        Some(Self::new(&base_url, &service_key))
    }

    pub fn new(base_url: &str, service_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            http: build_client(),
        }
    }

    pub async fn record_visibility(&self, audit: &VisibilityAudit) -> Result<(), AuditError> {
        let url = format!("{}/rest/v1/visibility_checks", self.base_url);
        let response = self
            .http
            .post(url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .json(audit)
            .send()
            .await
            .map_err(|err| AuditError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuditError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::spawn_stub;
    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn audit_rows_are_posted_with_service_key() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_ref = hits.clone();
        let app = Router::new()
            .route(
                "/rest/v1/visibility_checks",
                post(
                    |State(hits): State<Arc<AtomicU32>>,
                     headers: axum::http::HeaderMap,
                     Json(body): Json<serde_json::Value>| async move {
                        assert_eq!(
                            headers.get("apikey").and_then(|v| v.to_str().ok()),
                            Some("secreto")
                        );
                        assert_eq!(body["sku_id"], "31");
                        assert_eq!(body["visible"], true);
                        hits.fetch_add(1, Ordering::SeqCst);
                        StatusCode::CREATED
                    },
                ),
            )
            .with_state(hits_ref);
        let base = spawn_stub(app).await;

        let store = AuditStore::new(&base, "secreto");
        let audit = VisibilityAudit {
            account: "tienda".to_string(),
            sku_id: "31".to_string(),
            ean: None,
            visible: true,
            reason: String::new(),
            has_images: Some(true),
            price: Some(100.0),
            stock: Some(3),
            checked_at: Utc::now(),
        };
        store.record_visibility(&audit).await.expect("post");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_post_surfaces_an_error() {
        let app = Router::new().route(
            "/rest/v1/visibility_checks",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = spawn_stub(app).await;
        let store = AuditStore::new(&base, "secreto");
        let audit = VisibilityAudit {
            account: "tienda".to_string(),
            sku_id: "31".to_string(),
            ean: None,
            visible: false,
            reason: "Sin stock".to_string(),
            has_images: Some(true),
            price: Some(100.0),
            stock: Some(0),
            checked_at: Utc::now(),
        };
        assert!(store.record_visibility(&audit).await.is_err());
    }
}
