use crate::vtex::client::{FetchError, NotFound, Scope, VtexClient};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InventoryRecord {
    balance: Vec<WarehouseBalance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WarehouseBalance {
    total_quantity: i64,
    reserved_quantity: i64,
    has_unlimited_quantity: bool,
}

/// Stock aggregated across warehouses. An unlimited warehouse makes the SKU
/// available no matter what the counted total says.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StockSummary {
    pub total: i64,
    pub unlimited: bool,
}

impl StockSummary {
    pub fn available(&self) -> bool {
        self.unlimited || self.total > 0
    }
}

pub async fn get_inventory(
    client: &VtexClient,
    sku_id: u64,
) -> Result<Option<StockSummary>, FetchError> {
    let path = format!("/api/logistics/pvt/inventory/skus/{sku_id}");
    let record: Option<InventoryRecord> = client
        .get_json(Scope::Seller, &path, NotFound::Absent)
        .await?;
    Ok(record.map(|inventory| {
        let mut summary = StockSummary::default();
        for warehouse in &inventory.balance {
            summary.total += (warehouse.total_quantity - warehouse.reserved_quantity).max(0);
            if warehouse.has_unlimited_quantity {
                summary.unlimited = true;
            }
        }
        summary
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{spawn_stub, test_client};
    use axum::{Json, Router, routing::get};
    use tokio::time::Duration;

    #[tokio::test]
    async fn stock_sums_unreserved_across_warehouses() {
        let app = Router::new().route(
            "/api/logistics/pvt/inventory/skus/9",
            get(|| async {
                Json(serde_json::json!({"balance": [
                    {"totalQuantity": 10, "reservedQuantity": 4, "hasUnlimitedQuantity": false},
                    {"totalQuantity": 2, "reservedQuantity": 5, "hasUnlimitedQuantity": false}
                ]}))
            }),
        );
        let base = spawn_stub(app).await;
        let client = test_client(&base, Duration::from_millis(1));
        let stock = get_inventory(&client, 9).await.expect("fetch").expect("record");
        // Over-reserved warehouses clamp to zero instead of going negative.
        assert_eq!(stock.total, 6);
        assert!(!stock.unlimited);
        assert!(stock.available());
    }

    #[tokio::test]
    async fn unlimited_warehouse_short_circuits_availability() {
        let app = Router::new().route(
            "/api/logistics/pvt/inventory/skus/9",
            get(|| async {
                Json(serde_json::json!({"balance": [
                    {"totalQuantity": 0, "reservedQuantity": 0, "hasUnlimitedQuantity": true}
                ]}))
            }),
        );
        let base = spawn_stub(app).await;
        let client = test_client(&base, Duration::from_millis(1));
        let stock = get_inventory(&client, 9).await.expect("fetch").expect("record");
        assert_eq!(stock.total, 0);
        assert!(stock.available());
    }
}
