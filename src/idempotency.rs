use crate::models::EnqueueResponse;
use redis::AsyncCommands;

// Replay cache for job submissions: the same Idempotency-Key returns the
// originally enqueued job instead of scheduling a second run. Keys are
// namespaced so the Redis instance can be shared.

fn namespaced(key: &str) -> String {
    format!("vitrina:idem:{key}")
}

pub async fn redis_get(client: &redis::Client, key: &str) -> Option<EnqueueResponse> {
    let mut conn = client.get_multiplexed_async_connection().await.ok()?;
    let stored: Option<String> = conn.get(namespaced(key)).await.ok()?;
    stored.and_then(|raw| serde_json::from_str(&raw).ok())
}

pub async fn redis_set(
    client: &redis::Client,
    key: &str,
    value: &EnqueueResponse,
    ttl_secs: usize,
) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(namespaced(key), json, ttl_secs as u64).await;
    }
}
