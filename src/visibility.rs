use crate::audit::{AuditStore, VisibilityAudit};
use crate::cache::MemoCache;
use crate::pipeline::{PipelineConfig, RunContext};
use crate::progress::{ProgressBatcher, ProgressSink};
use crate::runner::run_phase;
use crate::vtex::VtexClient;
use crate::vtex::{catalog, inventory, pricing};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// What a visibility check starts from: a catalog id, or a barcode that has
/// to be resolved to one first.
#[derive(Debug, Clone)]
pub enum VisibilityTarget {
    Sku(u64),
    Ean(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct VisibilityOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ean: Option<String>,
    pub sku_id: String,
    pub visible: bool,
    pub reason: String,
    pub has_images: Option<bool>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
}

impl VisibilityOutcome {
    fn not_visible(sku_id: impl Into<String>, reason: &str) -> Self {
        Self {
            ean: None,
            sku_id: sku_id.into(),
            visible: false,
            reason: reason.to_string(),
            has_images: None,
            price: None,
            stock: None,
        }
    }
}

/// Narrow variant of the export pipeline: per item, three short-circuit
/// stages (catalog, price, stock), the first failure naming the reason. Every
/// outcome is also written to the audit store when one is configured.
#[derive(Clone)]
pub struct VisibilityService {
    config: Arc<PipelineConfig>,
}

impl VisibilityService {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn run(
        &self,
        context: &RunContext,
        targets: Vec<VisibilityTarget>,
        sink: Arc<dyn ProgressSink>,
        audit: Option<Arc<AuditStore>>,
    ) -> Vec<VisibilityOutcome> {
        let total = targets.len();
        sink.set_total(total as u64);
        sink.log(&format!("Elementos a consultar: {total}"));

        // EANs are deduplicated per run: repeated codes resolve once.
        let resolved_eans: Arc<MemoCache<String, u64>> = Arc::new(MemoCache::new());
        let batcher = Arc::new(ProgressBatcher::new(
            sink.clone(),
            self.config.progress_flush_every,
        ));

        let client = context.client.clone();
        let account = context.account_id.clone();
        let sink_for_tasks = sink.clone();
        let outcomes = run_phase(
            targets,
            self.config.visibility_workers,
            batcher,
            move |target| {
                let client = client.clone();
                let account = account.clone();
                let sink = sink_for_tasks.clone();
                let audit = audit.clone();
                let resolved_eans = resolved_eans.clone();
                async move {
                    let outcome = check_target(&client, &resolved_eans, &sink, target).await;
                    if let Some(store) = audit {
                        persist_outcome(&store, &account, &outcome).await;
                    }
                    outcome
                }
            },
            || VisibilityOutcome::not_visible("", "Error inesperado"),
        )
        .await;

        sink.log(&format!("Consulta finalizada. {total} elementos procesados."));
        outcomes
    }
}

async fn check_target(
    client: &VtexClient,
    resolved_eans: &MemoCache<String, u64>,
    sink: &Arc<dyn ProgressSink>,
    target: VisibilityTarget,
) -> VisibilityOutcome {
    let (ean, sku_id) = match target {
        VisibilityTarget::Sku(sku_id) => (None, Some(sku_id)),
        VisibilityTarget::Ean(ean) => {
            let sku_id = resolved_eans
                .get_or_fetch(ean.clone(), || async {
                    catalog::resolve_ean(client, &ean).await.ok().flatten()
                })
                .await;
            if sku_id.is_none() {
                sink.log(&format!("EAN {ean}: NO ENCONTRADO"));
                let mut outcome = VisibilityOutcome::not_visible("", "EAN no encontrado");
                outcome.ean = Some(ean);
                return outcome;
            }
            sink.log(&format!("EAN {ean} -> SKU {}", sku_id.unwrap_or_default()));
            (Some(ean), sku_id)
        }
    };
    let sku_id = sku_id.unwrap_or_default();

    let mut outcome = check_sku(client, sku_id).await;
    outcome.ean = ean.clone();

    let label = match &ean {
        Some(ean) => format!("EAN {ean} (SKU {sku_id})"),
        None => format!("SKU {sku_id}"),
    };
    if outcome.visible {
        sink.log(&format!("{label}: VISIBLE"));
    } else {
        sink.log(&format!("{label}: NO VISIBLE ({})", outcome.reason));
    }
    outcome
}

/// The three-stage check itself. Stages run in order and stop at the first
/// disqualifier so a SKU with no images never touches the seller endpoints.
async fn check_sku(client: &VtexClient, sku_id: u64) -> VisibilityOutcome {
    let mut outcome = VisibilityOutcome {
        ean: None,
        sku_id: sku_id.to_string(),
        visible: true,
        reason: String::new(),
        has_images: None,
        price: None,
        stock: None,
    };

    // 1. Catalog: images and the two active flags.
    let detail = match catalog::get_sku_by_id(client, sku_id).await {
        Ok(Some(detail)) => detail,
        _ => {
            return VisibilityOutcome::not_visible(sku_id.to_string(), "Error al consultar catalogo");
        }
    };
    outcome.has_images = Some(detail.has_images());
    if !detail.has_images() {
        outcome.visible = false;
        outcome.reason = "Sin imagenes".to_string();
    } else if !detail.is_active {
        outcome.visible = false;
        outcome.reason = "SKU no activo".to_string();
    } else if !detail.is_product_active {
        outcome.visible = false;
        outcome.reason = "Producto no activo".to_string();
    }

    // 2. Price.
    if outcome.visible {
        match pricing::get_base_price(client, sku_id).await {
            Ok(price) => {
                outcome.price = price;
                if !price.is_some_and(|p| p > 0.0) {
                    outcome.visible = false;
                    outcome.reason = "Sin precio".to_string();
                }
            }
            Err(_) => {
                outcome.visible = false;
                outcome.reason = "Sin precio (error al consultar)".to_string();
            }
        }
    }

    // 3. Stock.
    if outcome.visible {
        match inventory::get_inventory(client, sku_id).await {
            Ok(stock) => {
                outcome.stock = stock.map(|s| s.total);
                if !stock.is_some_and(|s| s.available()) {
                    outcome.visible = false;
                    outcome.reason = "Sin stock".to_string();
                }
            }
            Err(_) => {
                outcome.visible = false;
                outcome.reason = "Sin stock (error al consultar)".to_string();
            }
        }
    }

    outcome
}

async fn persist_outcome(store: &AuditStore, account: &str, outcome: &VisibilityOutcome) {
    let audit = VisibilityAudit {
        account: account.to_string(),
        sku_id: outcome.sku_id.clone(),
        ean: outcome.ean.clone(),
        visible: outcome.visible,
        reason: outcome.reason.clone(),
        has_images: outcome.has_images,
        price: outcome.price,
        stock: outcome.stock,
        checked_at: Utc::now(),
    };
    if let Err(err) = store.record_visibility(&audit).await {
        warn!(
            target = "vitrina.audit",
            sku_id = %audit.sku_id,
            error = %err,
            "audit record failed"
        );
    }
}
