use crate::cache::MemoCache;
use crate::decision::{self, DecisionInput};
use crate::vtex::catalog::{BrandRef, CategoryRef, ProductRef, SkuDetail};
use crate::vtex::inventory::StockSummary;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

/// The stable column contract: the 52 columns of the official VTEX export
/// plus the three operator extras. Downstream file writers depend on this
/// exact set.
pub const EXPORT_COLUMNS: [&str; 55] = [
    "EAN",
    "ACTIVO",
    "FOTO",
    "CATALOGADO",
    "_IDSKU",
    "_NombreSku",
    "_ActivarSKUSiEsPosible",
    "_SkuActivo",
    "_EANSKU",
    "_Altura",
    "_AlturaReal",
    "_Anchura",
    "_AnchuraReal",
    "_Longitud",
    "_LongitudReal",
    "_Peso",
    "_PesoReal",
    "_UnidadMedida",
    "_MultiplicadorUnidad",
    "_CodigoReferenciaSKU",
    "_ValorFidelidad",
    "_FechaEstimadaLlegada",
    "_CodigoFabricante",
    "_IDProducto",
    "_NombreProducto",
    "_DescripcionCortaProducto",
    "_ProductoActivo",
    "_CodigoReferenciaProducto",
    "_MostrarEnSitio",
    "_LinkTexto",
    "_DescripcionProducto",
    "_FechaLanzamientoProducto",
    "_PalabrasClave",
    "_TituloSitio",
    "_DescripcionMetaTag",
    "_IDProveedor",
    "_MostrarSinStock",
    "_Kit",
    "_IDDepartamento",
    "_NombreDepartamento",
    "_IDCategoria",
    "_NombreCategoria",
    "_IDMarca",
    "_Marca",
    "_PesoVolumetrico",
    "_CondicionComercial",
    "_Tiendas",
    "_Accesorios",
    "_Similares",
    "_Sugerencias",
    "_ShowTogether",
    "_Adjunto",
    "Motivo",
    "Precio",
    "Stock",
];

pub const FAILURE_MARKER: &str = "ERROR";
pub const FAILURE_REASON: &str = "Error al consultar catalogo";

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputRow {
    #[serde(rename = "EAN")]
    pub ean: String,
    #[serde(rename = "ACTIVO")]
    pub active: String,
    #[serde(rename = "FOTO")]
    pub photo: String,
    #[serde(rename = "CATALOGADO")]
    pub cataloged: String,
    #[serde(rename = "_IDSKU")]
    pub sku_id: String,
    #[serde(rename = "_NombreSku")]
    pub sku_name: String,
    #[serde(rename = "_ActivarSKUSiEsPosible")]
    pub activate_if_possible: String,
    #[serde(rename = "_SkuActivo")]
    pub sku_active: String,
    #[serde(rename = "_EANSKU")]
    pub sku_ean: String,
    #[serde(rename = "_Altura")]
    pub height: String,
    #[serde(rename = "_AlturaReal")]
    pub real_height: String,
    #[serde(rename = "_Anchura")]
    pub width: String,
    #[serde(rename = "_AnchuraReal")]
    pub real_width: String,
    #[serde(rename = "_Longitud")]
    pub length: String,
    #[serde(rename = "_LongitudReal")]
    pub real_length: String,
    #[serde(rename = "_Peso")]
    pub weight: String,
    #[serde(rename = "_PesoReal")]
    pub real_weight: String,
    #[serde(rename = "_UnidadMedida")]
    pub measurement_unit: String,
    #[serde(rename = "_MultiplicadorUnidad")]
    pub unit_multiplier: String,
    #[serde(rename = "_CodigoReferenciaSKU")]
    pub sku_ref_code: String,
    #[serde(rename = "_ValorFidelidad")]
    pub reward_value: String,
    #[serde(rename = "_FechaEstimadaLlegada")]
    pub estimated_arrival: String,
    #[serde(rename = "_CodigoFabricante")]
    pub manufacturer_code: String,
    #[serde(rename = "_IDProducto")]
    pub product_id: String,
    #[serde(rename = "_NombreProducto")]
    pub product_name: String,
    #[serde(rename = "_DescripcionCortaProducto")]
    pub product_short_description: String,
    #[serde(rename = "_ProductoActivo")]
    pub product_active: String,
    #[serde(rename = "_CodigoReferenciaProducto")]
    pub product_ref_code: String,
    #[serde(rename = "_MostrarEnSitio")]
    pub visible_on_site: String,
    #[serde(rename = "_LinkTexto")]
    pub link_text: String,
    #[serde(rename = "_DescripcionProducto")]
    pub product_description: String,
    #[serde(rename = "_FechaLanzamientoProducto")]
    pub release_date: String,
    #[serde(rename = "_PalabrasClave")]
    pub keywords: String,
    #[serde(rename = "_TituloSitio")]
    pub site_title: String,
    #[serde(rename = "_DescripcionMetaTag")]
    pub meta_tag_description: String,
    #[serde(rename = "_IDProveedor")]
    pub supplier_id: String,
    #[serde(rename = "_MostrarSinStock")]
    pub show_without_stock: String,
    #[serde(rename = "_Kit")]
    pub kit: String,
    #[serde(rename = "_IDDepartamento")]
    pub department_id: String,
    #[serde(rename = "_NombreDepartamento")]
    pub department_name: String,
    #[serde(rename = "_IDCategoria")]
    pub category_id: String,
    #[serde(rename = "_NombreCategoria")]
    pub category_name: String,
    #[serde(rename = "_IDMarca")]
    pub brand_id: String,
    #[serde(rename = "_Marca")]
    pub brand_name: String,
    #[serde(rename = "_PesoVolumetrico")]
    pub cubic_weight: String,
    #[serde(rename = "_CondicionComercial")]
    pub commercial_condition: String,
    #[serde(rename = "_Tiendas")]
    pub sales_channels: String,
    #[serde(rename = "_Accesorios")]
    pub accessories: String,
    #[serde(rename = "_Similares")]
    pub similars: String,
    #[serde(rename = "_Sugerencias")]
    pub suggestions: String,
    #[serde(rename = "_ShowTogether")]
    pub show_together: String,
    #[serde(rename = "_Adjunto")]
    pub attachment: String,
    #[serde(rename = "Motivo")]
    pub reason: String,
    #[serde(rename = "Precio")]
    pub price: Option<f64>,
    #[serde(rename = "Stock")]
    pub stock: Option<i64>,
}

impl OutputRow {
    /// Stub emitted when the detail fetch for a SKU failed outright. The row
    /// still occupies its slot so no discovered identifier is ever dropped.
    pub fn failure_stub(sku_id: u64, reason: &str) -> Self {
        Self {
            active: FAILURE_MARKER.to_string(),
            photo: FAILURE_MARKER.to_string(),
            cataloged: FAILURE_MARKER.to_string(),
            sku_id: sku_id.to_string(),
            reason: reason.to_string(),
            ..Self::default()
        }
    }
}

/// Everything the assembler merges besides the detail records themselves.
pub struct AssemblyContext<'a> {
    pub products: &'a MemoCache<String, ProductRef>,
    pub categories: &'a MemoCache<String, CategoryRef>,
    pub brands: &'a MemoCache<String, BrandRef>,
    pub prices: &'a HashMap<u64, f64>,
    pub stocks: &'a HashMap<u64, StockSummary>,
    pub channel_filter: &'a [i64],
    pub with_price_stock: bool,
}

/// Merges detail, lookup caches and enrichment into one row per discovered
/// id, in discovery order.
pub fn build_rows(
    sku_ids: &[u64],
    details: &[Option<SkuDetail>],
    ctx: &AssemblyContext<'_>,
) -> Vec<OutputRow> {
    sku_ids
        .iter()
        .zip(details.iter())
        .map(|(sku_id, detail)| match detail {
            Some(detail) => build_row(*sku_id, detail, ctx),
            None => OutputRow::failure_stub(*sku_id, FAILURE_REASON),
        })
        .collect()
}

fn build_row(sku_id: u64, sku: &SkuDetail, ctx: &AssemblyContext<'_>) -> OutputRow {
    let product_key = sku.product_id.map(|id| id.to_string()).unwrap_or_default();
    let product = if product_key.is_empty() {
        None
    } else {
        ctx.products.get(&product_key).flatten()
    };

    // Category: the SKU's own, else the parent product's.
    let category_key = sku
        .category_id
        .or_else(|| product.as_ref().and_then(|p| p.category_id))
        .map(|id| id.to_string())
        .unwrap_or_default();
    let category_name = lookup_name(ctx.categories, &category_key);

    let department_key = product
        .as_ref()
        .and_then(|p| p.department_id)
        .map(|id| id.to_string())
        .unwrap_or_default();
    let department_name = lookup_name(ctx.categories, &department_key);

    let brand_key = sku.brand_id.map(|id| id.to_string()).unwrap_or_default();
    let brand_name = sku
        .brand_name
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            ctx.brands
                .get(&brand_key)
                .flatten()
                .and_then(|brand| brand.name)
                .unwrap_or_default()
        });

    let price = ctx.prices.get(&sku_id).copied();
    let stock = ctx.stocks.get(&sku_id).copied();

    let decision = decision::evaluate(&DecisionInput {
        sku,
        product: product.as_ref(),
        channel_filter: ctx.channel_filter,
        price,
        stock,
        with_price_stock: ctx.with_price_stock,
    });

    let ean = sku.ean_code();
    let has_photo = sku.has_images();
    let dim = sku.dimension.as_ref();
    let channels = sku
        .sales_channels
        .iter()
        .map(|channel| channel.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    OutputRow {
        ean: ean.clone(),
        active: si_no(Some(decision.active)),
        photo: si_no(Some(has_photo)),
        cataloged: si_no(Some(decision.cataloged)),
        sku_id: sku_id.to_string(),
        sku_name: clean_text(
            sku.name_complete
                .as_deref()
                .filter(|name| !name.is_empty())
                .or(sku.sku_name.as_deref())
                .unwrap_or_default(),
        ),
        activate_if_possible: si_no(sku.activate_if_possible),
        sku_active: si_no(Some(sku.is_active)),
        sku_ean: ean,
        height: num(sku.height.or_else(|| dim.and_then(|d| d.height))),
        real_height: num(sku.real_height.or_else(|| dim.and_then(|d| d.real_height))),
        width: num(sku.width.or_else(|| dim.and_then(|d| d.width))),
        real_width: num(sku.real_width.or_else(|| dim.and_then(|d| d.real_width))),
        length: num(sku.length.or_else(|| dim.and_then(|d| d.length))),
        real_length: num(sku.real_length.or_else(|| dim.and_then(|d| d.real_length))),
        weight: num(sku.weight.or_else(|| dim.and_then(|d| d.weight))),
        real_weight: num(sku.real_weight.or_else(|| dim.and_then(|d| d.real_weight))),
        measurement_unit: sku.measurement_unit.clone().unwrap_or_default(),
        unit_multiplier: num(sku.unit_multiplier),
        sku_ref_code: sku.ref_id.clone().unwrap_or_default(),
        reward_value: num(sku.reward_value),
        estimated_arrival: sku.estimated_date_arrival.clone().unwrap_or_default(),
        manufacturer_code: clean_text(sku.manufacturer_code.as_deref().unwrap_or_default()),
        product_id: product_key,
        product_name: clean_text(sku.product_name.as_deref().unwrap_or_default()),
        product_short_description: clean_text(
            product
                .as_ref()
                .and_then(|p| p.short_description.as_deref())
                .unwrap_or_default(),
        ),
        product_active: si_no(Some(sku.is_product_active)),
        product_ref_code: sku
            .product_ref_id
            .clone()
            .filter(|code| !code.is_empty())
            .or_else(|| product.as_ref().and_then(|p| p.ref_id.clone()))
            .unwrap_or_default(),
        visible_on_site: si_no(product.as_ref().and_then(|p| p.is_visible)),
        link_text: product
            .as_ref()
            .and_then(|p| p.link_id.clone())
            .unwrap_or_default(),
        product_description: clean_text(
            product
                .as_ref()
                .and_then(|p| p.description.as_deref())
                .unwrap_or_default(),
        ),
        release_date: product
            .as_ref()
            .and_then(|p| p.release_date.clone())
            .unwrap_or_default(),
        keywords: clean_text(
            product
                .as_ref()
                .and_then(|p| p.key_words.as_deref())
                .unwrap_or_default(),
        ),
        site_title: clean_text(
            product
                .as_ref()
                .and_then(|p| p.title.as_deref())
                .unwrap_or_default(),
        ),
        meta_tag_description: clean_text(
            product
                .as_ref()
                .and_then(|p| p.meta_tag_description.as_deref())
                .unwrap_or_default(),
        ),
        supplier_id: product
            .as_ref()
            .and_then(|p| p.supplier_id)
            .map(|id| id.to_string())
            .unwrap_or_default(),
        show_without_stock: si_no(product.as_ref().and_then(|p| p.show_without_stock)),
        kit: si_no(sku.is_kit),
        department_id: department_key,
        department_name: clean_text(&department_name),
        category_id: category_key,
        category_name: clean_text(&category_name),
        brand_id: brand_key,
        brand_name: clean_text(&brand_name),
        cubic_weight: num(dim.and_then(|d| d.cubic_weight)),
        commercial_condition: sku
            .commercial_condition_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        sales_channels: channels,
        accessories: String::new(),
        similars: String::new(),
        suggestions: String::new(),
        show_together: String::new(),
        attachment: String::new(),
        reason: if decision.active {
            String::new()
        } else {
            decision.reason_display()
        },
        price,
        stock: stock.map(|s| s.total),
    }
}

fn lookup_name(cache: &MemoCache<String, CategoryRef>, key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    cache
        .get(&key.to_string())
        .flatten()
        .and_then(|category| category.name)
        .unwrap_or_default()
}

fn si_no(value: Option<bool>) -> String {
    match value {
        Some(true) => "SI".to_string(),
        Some(false) => "NO".to_string(),
        None => String::new(),
    }
}

fn num(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("html tag pattern"));
static ILLEGAL_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\u{9F}]").expect("illegal char pattern")
});

/// Sanitizes free text for tabular serialization: unescape the usual HTML
/// entities, drop markup, drop control characters, collapse whitespace.
pub fn clean_text(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let unescaped = unescape_entities(value);
    let without_tags = HTML_TAG.replace_all(&unescaped, " ");
    let without_illegal = ILLEGAL_CHARS.replace_all(&without_tags, "");
    without_illegal
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn unescape_entities(value: &str) -> String {
    // `&amp;` last so an already-escaped entity is unescaped exactly once.
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtex::catalog::SkuImage;

    fn caches() -> (
        MemoCache<String, ProductRef>,
        MemoCache<String, CategoryRef>,
        MemoCache<String, BrandRef>,
    ) {
        (MemoCache::new(), MemoCache::new(), MemoCache::new())
    }

    fn detail(sku_id: u64) -> SkuDetail {
        let mut sku = SkuDetail {
            id: Some(sku_id),
            product_id: Some(900),
            product_name: Some("Fideos Tirabuzon 500g".to_string()),
            name_complete: Some("Fideos Tirabuzon 500g".to_string()),
            is_active: true,
            is_product_active: true,
            sales_channels: vec![1],
            images: vec![SkuImage {
                image_url: Some("https://img.example/f.jpg".to_string()),
            }],
            ..SkuDetail::default()
        };
        sku.alternate_ids.ean = Some("7790000000011".to_string());
        sku
    }

    #[tokio::test]
    async fn rows_match_discovery_order_with_stubs_for_failures() {
        let (products, categories, brands) = caches();
        let prices = HashMap::new();
        let stocks = HashMap::new();
        let ctx = AssemblyContext {
            products: &products,
            categories: &categories,
            brands: &brands,
            prices: &prices,
            stocks: &stocks,
            channel_filter: &[1, 3],
            with_price_stock: false,
        };

        let sku_ids = vec![10, 11, 12];
        let details = vec![Some(detail(10)), None, Some(detail(12))];
        let rows = build_rows(&sku_ids, &details, &ctx);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].sku_id, "10");
        assert_eq!(rows[2].sku_id, "12");

        let stub = &rows[1];
        assert_eq!(stub.sku_id, "11");
        assert_eq!(stub.active, FAILURE_MARKER);
        assert_eq!(stub.photo, FAILURE_MARKER);
        assert_eq!(stub.cataloged, FAILURE_MARKER);
        assert_eq!(stub.reason, FAILURE_REASON);
        assert!(stub.product_name.is_empty());
        assert!(stub.price.is_none());
    }

    #[tokio::test]
    async fn category_falls_back_through_parent_product() {
        let (products, categories, brands) = caches();
        products
            .get_or_fetch("900".to_string(), || async {
                Some(ProductRef {
                    id: Some(900),
                    category_id: Some(77),
                    department_id: Some(5),
                    is_visible: Some(true),
                    show_without_stock: Some(true),
                    ..ProductRef::default()
                })
            })
            .await;
        categories
            .get_or_fetch("77".to_string(), || async {
                Some(CategoryRef {
                    id: Some(77),
                    name: Some("Pastas".to_string()),
                })
            })
            .await;
        categories
            .get_or_fetch("5".to_string(), || async {
                Some(CategoryRef {
                    id: Some(5),
                    name: Some("Almacen".to_string()),
                })
            })
            .await;

        let prices = HashMap::new();
        let stocks = HashMap::new();
        let ctx = AssemblyContext {
            products: &products,
            categories: &categories,
            brands: &brands,
            prices: &prices,
            stocks: &stocks,
            channel_filter: &[1, 3],
            with_price_stock: false,
        };

        // SKU with no category of its own.
        let sku = detail(10);
        let rows = build_rows(&[10], &[Some(sku)], &ctx);
        assert_eq!(rows[0].category_id, "77");
        assert_eq!(rows[0].category_name, "Pastas");
        assert_eq!(rows[0].department_id, "5");
        assert_eq!(rows[0].department_name, "Almacen");
        assert_eq!(rows[0].active, "SI");
        assert_eq!(rows[0].cataloged, "SI");
    }

    #[tokio::test]
    async fn brand_name_prefers_inline_detail_over_cache() {
        let (products, categories, brands) = caches();
        brands
            .get_or_fetch("44".to_string(), || async {
                Some(BrandRef {
                    id: Some(44),
                    name: Some("Marca Cacheada".to_string()),
                })
            })
            .await;

        let prices = HashMap::new();
        let stocks = HashMap::new();
        let ctx = AssemblyContext {
            products: &products,
            categories: &categories,
            brands: &brands,
            prices: &prices,
            stocks: &stocks,
            channel_filter: &[1],
            with_price_stock: false,
        };

        let mut inline = detail(10);
        inline.brand_id = Some(44);
        inline.brand_name = Some("Marca Inline".to_string());
        let mut cached_only = detail(11);
        cached_only.brand_id = Some(44);

        let rows = build_rows(
            &[10, 11],
            &[Some(inline), Some(cached_only)],
            &ctx,
        );
        assert_eq!(rows[0].brand_name, "Marca Inline");
        assert_eq!(rows[1].brand_name, "Marca Cacheada");
    }

    #[test]
    fn serialized_row_carries_every_contract_column() {
        let row = OutputRow::failure_stub(1, FAILURE_REASON);
        let value = serde_json::to_value(&row).expect("serialize");
        let object = value.as_object().expect("object");
        assert_eq!(object.len(), EXPORT_COLUMNS.len());
        for column in EXPORT_COLUMNS {
            assert!(object.contains_key(column), "missing column {column}");
        }
    }

    #[test]
    fn clean_text_strips_markup_and_control_chars() {
        assert_eq!(
            clean_text("<p>Fideos  <b>al huevo</b></p>\x07 &amp; salsa"),
            "Fideos al huevo & salsa"
        );
        assert_eq!(clean_text("  ya   limpio "), "ya limpio");
        // Unescaping happens before tag stripping, so escaped markup is
        // treated as markup too.
        assert_eq!(clean_text("precio &lt;b&gt;final&lt;/b&gt;"), "precio final");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn tri_state_rendering() {
        assert_eq!(si_no(Some(true)), "SI");
        assert_eq!(si_no(Some(false)), "NO");
        assert_eq!(si_no(None), "");
        assert_eq!(num(Some(1.5)), "1.5");
        assert_eq!(num(None), "");
    }
}
