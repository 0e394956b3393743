use crate::vtex::client::{RetryPolicy, SessionConfig, VtexClient};
use axum::Router;
use tokio::time::Duration;

/// Binds an ephemeral local server for the given router and returns its base
/// URL. The serve task lives until the test runtime is torn down.
pub async fn spawn_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

/// A client whose marketplace and seller scopes both point at the stub.
pub fn test_client(base: &str, base_delay: Duration) -> VtexClient {
    let session = |base: &str| SessionConfig {
        base_url: base.to_string(),
        app_key: "test-key".to_string(),
        app_token: "test-token".to_string(),
    };
    VtexClient::new(
        session(base),
        session(base),
        RetryPolicy {
            max_attempts: 3,
            base_delay,
        },
        8,
    )
}
