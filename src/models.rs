use crate::visibility::VisibilityTarget;
use serde::{Deserialize, Serialize};

/// Enqueue a full catalog export for one configured account.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportJobRequest {
    pub account: String,
    /// Sales channels a SKU must intersect to count as sellable. Defaults to
    /// the standard storefront pair when omitted.
    #[serde(default)]
    pub sales_channels: Option<Vec<i64>>,
    #[serde(default = "default_true")]
    pub include_price_stock: bool,
}

/// Enqueue a visibility check for explicit SKU ids and/or EAN codes.
#[derive(Debug, Clone, Deserialize)]
pub struct VisibilityJobRequest {
    pub account: String,
    #[serde(default)]
    pub sku_ids: Vec<u64>,
    #[serde(default)]
    pub eans: Vec<String>,
}

impl VisibilityJobRequest {
    pub fn targets(&self) -> Vec<VisibilityTarget> {
        self.sku_ids
            .iter()
            .map(|sku_id| VisibilityTarget::Sku(*sku_id))
            .chain(
                self.eans
                    .iter()
                    .filter(|ean| !ean.trim().is_empty())
                    .map(|ean| VisibilityTarget::Ean(ean.trim().to_string())),
            )
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_request_defaults_price_stock_on() {
        let request: ExportJobRequest =
            serde_json::from_str(r#"{"account": "tienda"}"#).expect("deserialize");
        assert!(request.include_price_stock);
        assert!(request.sales_channels.is_none());
    }

    #[test]
    fn visibility_targets_keep_sku_then_ean_order_and_trim() {
        let request: VisibilityJobRequest = serde_json::from_str(
            r#"{"account": "tienda", "sku_ids": [31, 40], "eans": [" 779000 ", ""]}"#,
        )
        .expect("deserialize");
        let targets = request.targets();
        assert_eq!(targets.len(), 3);
        assert!(matches!(targets[0], VisibilityTarget::Sku(31)));
        assert!(matches!(targets[1], VisibilityTarget::Sku(40)));
        match &targets[2] {
            VisibilityTarget::Ean(ean) => assert_eq!(ean, "779000"),
            other => panic!("unexpected target {other:?}"),
        }
    }
}
