use crate::vtex::{ProductRef, SkuDetail, StockSummary};

/// Category names that disqualify a SKU regardless of anything else,
/// compared case- and accent-insensitively.
const DISALLOWED_CATEGORIES: [&str; 2] = ["deshabilitados", "categoria default"];

#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub sku: &'a SkuDetail,
    pub product: Option<&'a ProductRef>,
    pub channel_filter: &'a [i64],
    pub price: Option<f64>,
    pub stock: Option<StockSummary>,
    /// Whether the run fetched price/stock at all; when false those checks
    /// are skipped entirely rather than read as missing data.
    pub with_price_stock: bool,
}

/// Derived activation verdict for one SKU. `active` holds exactly when
/// `reasons` is empty; the reasons keep their evaluation order because the
/// joined string ends up verbatim in the operator-facing `Motivo` column.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub quality_ok: bool,
    pub active: bool,
    pub reasons: Vec<String>,
    pub cataloged: bool,
}

impl Decision {
    pub fn reason_display(&self) -> String {
        self.reasons.join(", ")
    }
}

pub fn evaluate(input: &DecisionInput<'_>) -> Decision {
    let sku = input.sku;
    let has_photo = sku.has_images();
    let description = input
        .product
        .and_then(|p| p.description.as_deref())
        .unwrap_or("");

    let quality_ok = compute_quality(sku, has_photo, description);

    let mut reasons: Vec<String> = Vec::new();

    if !has_photo {
        reasons.push("Sin imagenes".to_string());
    }

    if !quality_ok {
        if let Some(name) = sku.product_name.as_deref()
            && !name.is_empty()
            && is_all_uppercase(name)
        {
            reasons.push("Nombre todo mayusculas".to_string());
        }
        if let Some(bad) = first_disallowed_category(sku) {
            reasons.push(format!("Categoria: {bad}"));
        }
        // Quality failed for a cause already reported (no photo, upper-case
        // description); only flag generically when nothing else explains it.
        if reasons.is_empty() {
            reasons.push("No catalogado (calidad)".to_string());
        }
    }

    if !sku.is_active {
        reasons.push("SKU inactivo".to_string());
    }
    if !sku.is_product_active {
        reasons.push("Producto inactivo".to_string());
    }

    match input.product {
        Some(product) => {
            if !product.is_visible.unwrap_or(false) {
                reasons.push("No visible en sitio".to_string());
            }
            if !product.show_without_stock.unwrap_or(false) {
                reasons.push("ShowWithoutStock desactivado".to_string());
            }
        }
        None => {
            reasons.push("Sin datos de producto".to_string());
        }
    }

    if !input
        .channel_filter
        .iter()
        .any(|channel| sku.sales_channels.contains(channel))
    {
        let channels = input
            .channel_filter
            .iter()
            .map(|channel| channel.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        reasons.push(format!("Sin ninguno de SC [{channels}]"));
    }

    if input.with_price_stock {
        if input.price.is_none() {
            reasons.push("Sin precio".to_string());
        }
        // Absent stock data is degradation, not a verdict; only a fetched,
        // non-unlimited, non-positive balance disqualifies.
        if let Some(stock) = input.stock
            && !stock.available()
        {
            reasons.push("Sin stock".to_string());
        }
    }

    let active = reasons.is_empty();
    let cataloged = active && has_photo && !sku.ean_code().trim().is_empty();

    Decision {
        quality_ok,
        active,
        reasons,
        cataloged,
    }
}

fn compute_quality(sku: &SkuDetail, has_photo: bool, description: &str) -> bool {
    let name_ok = match sku.product_name.as_deref() {
        Some(name) if !name.is_empty() => !is_all_uppercase(name),
        _ => false,
    };
    let description_ok = description.is_empty() || !is_all_uppercase(description);
    let category_ok = first_disallowed_category(sku).is_none();
    name_ok && has_photo && description_ok && category_ok
}

fn first_disallowed_category(sku: &SkuDetail) -> Option<String> {
    sku.product_categories
        .values()
        .find(|name| {
            let folded = fold_accents(name.trim()).to_lowercase();
            DISALLOWED_CATEGORIES.contains(&folded.as_str())
        })
        .cloned()
}

/// True when the string has cased characters and none of them is lowercase.
fn is_all_uppercase(text: &str) -> bool {
    let mut has_cased = false;
    for ch in text.chars() {
        if ch.is_lowercase() {
            return false;
        }
        if ch.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased
}

fn fold_accents(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'Á' | 'À' | 'Ä' | 'Â' => 'A',
            'É' | 'È' | 'Ë' | 'Ê' => 'E',
            'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
            'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
            'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
            other => other,
        })
        .collect()
}
