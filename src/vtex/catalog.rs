#![allow(dead_code)]

use crate::vtex::client::{FetchError, NotFound, Scope, VtexClient};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;
use urlencoding::encode;

/// Catalog detail for one SKU as returned by `stockkeepingunitbyid`.
///
/// Every field is defensive: VTEX omits or nulls most of them freely, so the
/// deserialization boundary absorbs that and the rest of the pipeline works
/// with plain `Option`s.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SkuDetail {
    pub id: Option<u64>,
    pub product_id: Option<u64>,
    pub name_complete: Option<String>,
    pub sku_name: Option<String>,
    pub product_name: Option<String>,
    pub is_active: bool,
    pub is_product_active: bool,
    pub activate_if_possible: Option<bool>,
    pub brand_id: Option<u64>,
    pub brand_name: Option<String>,
    pub category_id: Option<u64>,
    pub images: Vec<SkuImage>,
    pub sales_channels: Vec<i64>,
    pub alternate_ids: AlternateIds,
    pub ean: Option<String>,
    pub height: Option<f64>,
    pub real_height: Option<f64>,
    pub width: Option<f64>,
    pub real_width: Option<f64>,
    pub length: Option<f64>,
    pub real_length: Option<f64>,
    pub weight: Option<f64>,
    pub real_weight: Option<f64>,
    pub dimension: Option<SkuDimension>,
    pub measurement_unit: Option<String>,
    pub unit_multiplier: Option<f64>,
    pub ref_id: Option<String>,
    pub reward_value: Option<f64>,
    pub estimated_date_arrival: Option<String>,
    pub manufacturer_code: Option<String>,
    pub product_ref_id: Option<String>,
    pub is_kit: Option<bool>,
    pub commercial_condition_id: Option<i64>,
    pub product_categories: HashMap<String, String>,
}

impl SkuDetail {
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    /// EAN from the alternate-id block, falling back to the legacy top-level
    /// field some catalogs still populate.
    pub fn ean_code(&self) -> String {
        self.alternate_ids
            .ean
            .clone()
            .filter(|ean| !ean.is_empty())
            .or_else(|| self.ean.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SkuImage {
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AlternateIds {
    pub ean: Option<String>,
}

/// Measurement block nested under `Dimension`; key casing is camelCase except
/// for the cubic weight, which shows up both ways in the wild.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SkuDimension {
    pub height: Option<f64>,
    pub real_height: Option<f64>,
    pub width: Option<f64>,
    pub real_width: Option<f64>,
    pub length: Option<f64>,
    pub real_length: Option<f64>,
    pub weight: Option<f64>,
    pub real_weight: Option<f64>,
    #[serde(rename = "cubicweight", alias = "CubicWeight")]
    pub cubic_weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ProductRef {
    pub id: Option<u64>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub ref_id: Option<String>,
    pub is_visible: Option<bool>,
    pub link_id: Option<String>,
    pub release_date: Option<String>,
    pub key_words: Option<String>,
    pub title: Option<String>,
    pub meta_tag_description: Option<String>,
    pub supplier_id: Option<u64>,
    pub show_without_stock: Option<bool>,
    pub category_id: Option<u64>,
    pub department_id: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CategoryRef {
    pub id: Option<u64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BrandRef {
    pub id: Option<u64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct SkuByEan {
    id: Option<u64>,
}

/// Walks the paginated id listing from page 1 until a short or empty page.
///
/// This is the pipeline's single fatal failure mode: a failed page request
/// aborts discovery because every later page depends on it.
pub async fn list_all_sku_ids(
    client: &VtexClient,
    page_size: usize,
) -> Result<Vec<u64>, FetchError> {
    let mut all_ids: Vec<u64> = Vec::new();
    let mut page = 1usize;
    loop {
        let path = format!(
            "/api/catalog_system/pvt/sku/stockkeepingunitids?page={page}&pagesize={page_size}"
        );
        let ids: Vec<u64> = client
            .get_json(Scope::Marketplace, &path, NotFound::Retry)
            .await?
            .unwrap_or_default();
        if ids.is_empty() {
            break;
        }
        let fetched = ids.len();
        all_ids.extend(ids);
        debug!(
            target = "vitrina.vtex",
            page = page,
            fetched = fetched,
            total = all_ids.len(),
            "sku id page"
        );
        if fetched < page_size {
            break;
        }
        page += 1;
    }
    Ok(all_ids)
}

pub async fn get_sku_by_id(
    client: &VtexClient,
    sku_id: u64,
) -> Result<Option<SkuDetail>, FetchError> {
    let path = format!("/api/catalog_system/pvt/sku/stockkeepingunitbyid/{sku_id}");
    client.get_json(Scope::Marketplace, &path, NotFound::Absent).await
}

pub async fn get_product(
    client: &VtexClient,
    product_id: &str,
) -> Result<Option<ProductRef>, FetchError> {
    let path = format!("/api/catalog/pvt/product/{product_id}");
    client.get_json(Scope::Marketplace, &path, NotFound::Absent).await
}

pub async fn get_category(
    client: &VtexClient,
    category_id: &str,
) -> Result<Option<CategoryRef>, FetchError> {
    let path = format!("/api/catalog/pvt/category/{category_id}");
    client.get_json(Scope::Marketplace, &path, NotFound::Absent).await
}

pub async fn get_brand(
    client: &VtexClient,
    brand_id: &str,
) -> Result<Option<BrandRef>, FetchError> {
    let path = format!("/api/catalog_system/pvt/brand/{brand_id}");
    client.get_json(Scope::Marketplace, &path, NotFound::Absent).await
}

/// Resolves an EAN (or any alternate barcode) to the owning SKU id.
pub async fn resolve_ean(client: &VtexClient, ean: &str) -> Result<Option<u64>, FetchError> {
    let path = format!(
        "/api/catalog_system/pvt/sku/stockkeepingunitbyean/{}",
        encode(ean)
    );
    let found: Option<SkuByEan> = client
        .get_json(Scope::Marketplace, &path, NotFound::Absent)
        .await?;
    Ok(found.and_then(|sku| sku.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{spawn_stub, test_client};
    use axum::{Json, Router, extract::Query, routing::get};
    use tokio::time::Duration;

    #[derive(serde::Deserialize)]
    struct PageQuery {
        page: usize,
        pagesize: usize,
    }

    fn paged_router(page_sizes: &'static [usize]) -> Router {
        Router::new().route(
            "/api/catalog_system/pvt/sku/stockkeepingunitids",
            get(move |Query(q): Query<PageQuery>| async move {
                let count = page_sizes.get(q.page - 1).copied().unwrap_or(0);
                let start = (q.page - 1) as u64 * q.pagesize as u64;
                let ids: Vec<u64> = (start..start + count as u64).collect();
                Json(ids)
            }),
        )
    }

    #[tokio::test]
    async fn discovery_stops_on_short_page() {
        let base = spawn_stub(paged_router(&[200, 200, 47])).await;
        let client = test_client(&base, Duration::from_millis(1));
        let ids = list_all_sku_ids(&client, 200).await.expect("discovery");
        assert_eq!(ids.len(), 447);
        assert_eq!(ids.first(), Some(&0));
        assert_eq!(ids.last(), Some(&446));
    }

    #[tokio::test]
    async fn discovery_stops_on_empty_page() {
        let base = spawn_stub(paged_router(&[200, 200, 200, 0])).await;
        let client = test_client(&base, Duration::from_millis(1));
        let ids = list_all_sku_ids(&client, 200).await.expect("discovery");
        assert_eq!(ids.len(), 600);
    }

    #[tokio::test]
    async fn discovery_failure_is_fatal() {
        let app = Router::new().route(
            "/api/catalog_system/pvt/sku/stockkeepingunitids",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "") }),
        );
        let base = spawn_stub(app).await;
        let client = test_client(&base, Duration::from_millis(1));
        assert!(list_all_sku_ids(&client, 200).await.is_err());
    }

    #[tokio::test]
    async fn ean_resolution_returns_owning_sku() {
        let app = Router::new().route(
            "/api/catalog_system/pvt/sku/stockkeepingunitbyean/{ean}",
            get(|| async { Json(serde_json::json!({"Id": 4412})) }),
        );
        let base = spawn_stub(app).await;
        let client = test_client(&base, Duration::from_millis(1));
        let sku = resolve_ean(&client, "7791234567890").await.expect("lookup");
        assert_eq!(sku, Some(4412));
    }

    #[test]
    fn sku_detail_deserializes_defensively() {
        let raw = serde_json::json!({
            "Id": 31,
            "ProductId": 9,
            "NameComplete": "Yerba Mate 1kg",
            "IsActive": true,
            "IsProductActive": true,
            "AlternateIds": {"Ean": "7790001001234"},
            "Images": [{"ImageUrl": "https://img.example/1.jpg"}],
            "SalesChannels": [1, 3],
            "Dimension": {"height": 10.0, "cubicweight": 0.42},
            "ProductCategories": {"12": "Almacen"}
        });
        let detail: SkuDetail = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(detail.ean_code(), "7790001001234");
        assert!(detail.has_images());
        assert_eq!(detail.dimension.as_ref().and_then(|d| d.cubic_weight), Some(0.42));
        assert!(detail.brand_id.is_none());
        assert!(detail.product_name.is_none());
    }
}
