use crate::http::build_session_client;
use crate::vtex::config::{ResolvedAccount, base_url_for};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("rate limited after {0} attempts")]
    RateLimited(u32),
}

/// Which credential scope a call runs under. Catalog truth (detail, product,
/// category, brand, EAN lookup) is marketplace authority; price and stock are
/// the seller's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Marketplace,
    Seller,
}

/// How a 404 is interpreted: several lookups legitimately have no data behind
/// them (`Absent`), everywhere else it is just another failed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFound {
    Absent,
    Retry,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        // Linear backoff: the delay grows with the attempt number.
        self.base_delay * attempt
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub app_key: String,
    pub app_token: String,
}

#[derive(Clone)]
struct Session {
    base_url: String,
    client: Client,
}

impl Session {
    fn new(config: &SessionConfig, pool_size: usize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&config.app_key) {
            headers.insert("X-VTEX-API-AppKey", value);
        }
        if let Ok(value) = HeaderValue::from_str(&config.app_token) {
            headers.insert("X-VTEX-API-AppToken", value);
        }
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: build_session_client(headers, pool_size),
        }
    }
}

/// HTTP front door to one seller/marketplace pair. Retries transient
/// failures with linear backoff and honors the VTEX 429 rate-limit signal by
/// sleeping `base_delay * attempt` before trying again.
#[derive(Clone)]
pub struct VtexClient {
    marketplace: Session,
    seller: Session,
    retry: RetryPolicy,
}

impl VtexClient {
    pub fn new(
        marketplace: SessionConfig,
        seller: SessionConfig,
        retry: RetryPolicy,
        pool_size: usize,
    ) -> Self {
        Self {
            marketplace: Session::new(&marketplace, pool_size),
            seller: Session::new(&seller, pool_size),
            retry,
        }
    }

    pub fn for_account(account: &ResolvedAccount, retry: RetryPolicy, pool_size: usize) -> Self {
        let marketplace = SessionConfig {
            base_url: base_url_for(&account.marketplace.account_name),
            app_key: account.marketplace.app_key.clone(),
            app_token: account.marketplace.app_token.clone(),
        };
        let seller = SessionConfig {
            base_url: base_url_for(&account.seller.account_name),
            app_key: account.seller.app_key.clone(),
            app_token: account.seller.app_token.clone(),
        };
        Self::new(marketplace, seller, retry, pool_size)
    }

    fn session(&self, scope: Scope) -> &Session {
        match scope {
            Scope::Marketplace => &self.marketplace,
            Scope::Seller => &self.seller,
        }
    }

    /// GET `path` under the given scope and decode the JSON body.
    ///
    /// `Ok(None)` means the resource is legitimately absent (404 with
    /// `NotFound::Absent`); `Err` means the call failed after exhausting
    /// retries. Callers decide which of those is fatal for them.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        scope: Scope,
        path: &str,
        on_404: NotFound,
    ) -> Result<Option<T>, FetchError> {
        let session = self.session(scope);
        let url = format!("{}{}", session.base_url, path);
        let mut last = FetchError::RateLimited(self.retry.max_attempts);

        for attempt in 1..=self.retry.max_attempts {
            let response = match session.client.get(&url).send().await {
                Ok(response) => response,
                Err(err) => {
                    last = FetchError::Request(err.to_string());
                    if attempt < self.retry.max_attempts {
                        sleep(self.retry.delay_for(attempt)).await;
                        continue;
                    }
                    error!(target = "vitrina.vtex", url = %url, error = %last, "request failed");
                    return Err(last);
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = self.retry.delay_for(attempt);
                warn!(
                    target = "vitrina.vtex",
                    url = %url,
                    attempt = attempt,
                    wait_ms = wait.as_millis() as u64,
                    "429, backing off"
                );
                sleep(wait).await;
                continue;
            }
            if status == StatusCode::NOT_FOUND && on_404 == NotFound::Absent {
                return Ok(None);
            }
            if !status.is_success() {
                last = FetchError::Status(status.as_u16());
                if attempt < self.retry.max_attempts {
                    sleep(self.retry.delay_for(attempt)).await;
                    continue;
                }
                error!(target = "vitrina.vtex", url = %url, status = status.as_u16(), "giving up");
                return Err(last);
            }

            return match response.json::<T>().await {
                Ok(value) => Ok(Some(value)),
                Err(err) => Err(FetchError::Decode(err.to_string())),
            };
        }

        Err(last)
    }
}
