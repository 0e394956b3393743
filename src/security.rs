use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, ClientRecord>>,
    limiter: Arc<TokenBuckets>,
}

/// Identity attached to every authenticated request.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub org_id: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct ClientRecord {
    org_id: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        Self {
            records: Arc::new(load_keys_from_env()),
            limiter: Arc::new(TokenBuckets::from_env()),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            org_id: record.org_id.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Vitrina-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&context.org_id).await {
        Verdict::Allowed(headers) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            headers.apply(response.headers_mut());
            Ok(response)
        }
        Verdict::Limited(headers) => {
            let mut response =
                error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Too many requests");
            headers.apply(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Vitrina-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

/// `VITRINA_API_KEYS` format: comma-separated `org:secret` pairs.
fn load_keys_from_env() -> HashMap<String, ClientRecord> {
    let raw = env::var("VITRINA_API_KEYS").unwrap_or_else(|_| "demo-org:demo-key".to_string());
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let org_id = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (org_id, key) {
            (Some(org), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    ClientRecord {
                        org_id: org.to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(
                target = "vitrina.api",
                "ignored malformed VITRINA_API_KEYS entry: {trimmed}"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "vitrina.api",
            "VITRINA_API_KEYS produced no keys; falling back to demo credentials"
        );
        entries.insert(
            "demo-key".to_string(),
            ClientRecord {
                org_id: "demo-org".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "vitrina.api",
            key_count = entries.len(),
            "loaded API keys from env"
        );
    }

    entries
}

enum Verdict {
    Allowed(RateHeaders),
    Limited(RateHeaders),
}

/// Per-org token buckets guarding the job endpoints.
struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, BucketState>>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBuckets {
    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn consume(&self, key: &str) -> Verdict {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Verdict::Allowed(RateHeaders {
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
                retry_after: None,
            })
        } else {
            let deficit = 1.0 - state.tokens;
            Verdict::Limited(RateHeaders {
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
                retry_after: Some((deficit / self.rate_per_sec).max(0.0)),
            })
        }
    }
}

struct RateHeaders {
    capacity: f64,
    tokens: f64,
    rate: f64,
    retry_after: Option<f64>,
}

impl RateHeaders {
    fn apply(&self, headers: &mut http::HeaderMap) {
        let set = |headers: &mut http::HeaderMap, name: &'static str, value: u64| {
            headers.insert(
                name,
                HeaderValue::from_str(&value.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("0")),
            );
        };
        set(headers, "X-RateLimit-Limit", self.capacity as u64);
        set(
            headers,
            "X-RateLimit-Remaining",
            self.tokens.max(0.0).floor() as u64,
        );
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        set(headers, "X-RateLimit-Reset", reset);
        if let Some(retry_after) = self.retry_after {
            headers.insert(
                http::header::RETRY_AFTER,
                HeaderValue::from_str(&(retry_after.ceil().max(0.0) as u64).to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("1")),
            );
        }
    }
}
