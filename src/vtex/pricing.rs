use crate::vtex::client::{FetchError, NotFound, Scope, VtexClient};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PriceRecord {
    base_price: Option<f64>,
}

/// Base price for one SKU under the seller's own pricing table.
///
/// `None` means no price is registered, which the decision engine treats very
/// differently from a price of zero.
pub async fn get_base_price(client: &VtexClient, sku_id: u64) -> Result<Option<f64>, FetchError> {
    let path = format!("/api/pricing/prices/{sku_id}");
    let record: Option<PriceRecord> = client
        .get_json(Scope::Seller, &path, NotFound::Absent)
        .await?;
    Ok(record.and_then(|r| r.base_price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{spawn_stub, test_client};
    use axum::{Json, Router, routing::get};
    use tokio::time::Duration;

    #[tokio::test]
    async fn price_absent_and_present_are_distinct() {
        let app = Router::new()
            .route(
                "/api/pricing/prices/1",
                get(|| async { Json(serde_json::json!({"basePrice": 1999.9})) }),
            )
            .route(
                "/api/pricing/prices/2",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "") }),
            )
            .route(
                "/api/pricing/prices/3",
                get(|| async { Json(serde_json::json!({"basePrice": null})) }),
            );
        let base = spawn_stub(app).await;
        let client = test_client(&base, Duration::from_millis(1));

        assert_eq!(get_base_price(&client, 1).await.expect("1"), Some(1999.9));
        assert_eq!(get_base_price(&client, 2).await.expect("2"), None);
        assert_eq!(get_base_price(&client, 3).await.expect("3"), None);
    }
}
