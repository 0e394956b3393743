use crate::assemble::{AssemblyContext, OutputRow, build_rows};
use crate::cache::MemoCache;
use crate::progress::{NullSink, ProgressBatcher, ProgressSink};
use crate::runner::run_phase;
use crate::vtex::catalog::{self, BrandRef, CategoryRef, ProductRef, SkuDetail};
use crate::vtex::client::{RetryPolicy, VtexClient};
use crate::vtex::config::AccountRegistry;
use crate::vtex::inventory::{self, StockSummary};
use crate::vtex::pricing;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;

/// Tuning for every phase of a run. One immutable struct handed to the
/// service at construction; nothing reads tuning from globals mid-run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Shared width of the detail and lookup fetch phases.
    pub fetch_workers: usize,
    pub quote_workers: usize,
    pub visibility_workers: usize,
    pub page_size: usize,
    pub progress_flush_every: u64,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_workers: 100,
            quote_workers: 100,
            visibility_workers: 5,
            page_size: 200,
            progress_flush_every: 200,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fetch_workers: env_usize("EXPORT_FETCH_WORKERS", defaults.fetch_workers),
            quote_workers: env_usize("EXPORT_QUOTE_WORKERS", defaults.quote_workers),
            visibility_workers: env_usize("VISIBILITY_WORKERS", defaults.visibility_workers),
            page_size: env_usize("EXPORT_PAGE_SIZE", defaults.page_size),
            progress_flush_every: env_usize(
                "PROGRESS_FLUSH_EVERY",
                defaults.progress_flush_every as usize,
            ) as u64,
            retry: RetryPolicy {
                max_attempts: env_usize("FETCH_MAX_ATTEMPTS", 3) as u32,
                base_delay: Duration::from_millis(env_usize("FETCH_RETRY_BASE_MS", 2000) as u64),
            },
        }
    }

    /// Pool sizing hint: the widest phase this config can run.
    pub fn max_concurrency(&self) -> usize {
        self.fetch_workers
            .max(self.quote_workers)
            .max(self.visibility_workers)
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// Connection and policy bundle for one run. Built from the account registry,
/// dropped when the run ends.
pub struct RunContext {
    pub account_id: String,
    pub client: VtexClient,
    pub channel_filter: Vec<i64>,
    pub with_price_stock: bool,
}

impl RunContext {
    pub fn for_account(
        registry: &AccountRegistry,
        account_id: &str,
        channel_filter: Option<Vec<i64>>,
        with_price_stock: bool,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let account = registry.resolve(account_id).ok_or_else(|| {
            PipelineError::invalid_input("account", format!("unknown account `{account_id}`"))
        })?;
        info!(
            target = "vitrina.jobs",
            seller = %account.seller.name.as_deref().unwrap_or(&account.seller.account_name),
            marketplace = %account.marketplace.account_name,
            "run context ready"
        );
        let client = VtexClient::for_account(&account, config.retry, config.max_concurrency());
        Ok(Self {
            account_id: account_id.to_string(),
            client,
            channel_filter: channel_filter.filter(|f| !f.is_empty()).unwrap_or(vec![1, 3]),
            with_price_stock,
        })
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

/// Tasks of the heterogeneous lookup phase: every unique product, category
/// and brand id found in the detail records, one fetch each.
#[derive(Debug, Clone)]
enum LookupTask {
    Product(String),
    Category(String),
    Brand(String),
}

/// Price and stock requests interleaved per SKU so the load spreads evenly
/// across the two seller endpoints instead of bursting one of them.
#[derive(Debug, Clone, Copy)]
enum QuoteTask {
    Price(u64),
    Stock(u64),
}

enum QuoteOutcome {
    Price(u64, Option<f64>),
    Stock(u64, Option<StockSummary>),
    Missed,
}

/// The catalog export pipeline: discover ids, fetch details, resolve shared
/// references through the memo caches, optionally fetch price/stock, then
/// assemble one fixed-schema row per id.
#[derive(Clone)]
pub struct CatalogExportService {
    config: Arc<PipelineConfig>,
}

impl CatalogExportService {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(
        &self,
        context: &RunContext,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Vec<OutputRow>, PipelineError> {
        let started = Instant::now();

        sink.log("Fase 0: obteniendo listado de SKU IDs...");
        let sku_ids = catalog::list_all_sku_ids(&context.client, self.config.page_size)
            .await
            .map_err(|err| PipelineError::internal("discover", err.to_string()))?;
        if sku_ids.is_empty() {
            sink.log("No se encontraron SKU IDs para esta cuenta.");
            return Ok(Vec::new());
        }

        let total = sku_ids.len();
        sink.log(&format!("SKU IDs encontrados: {total}"));

        // Fase 1: per-SKU detail, full width.
        sink.set_total(total as u64);
        sink.log(&format!(
            "Fase 1: obteniendo detalles de {total} SKUs ({} workers)...",
            self.config.fetch_workers
        ));
        let details = self.fetch_details(context, &sku_ids, &sink).await;

        // Unique cross-reference ids. Brands only when the detail did not
        // already carry the name inline.
        let mut product_ids: BTreeSet<String> = BTreeSet::new();
        let mut category_ids: BTreeSet<String> = BTreeSet::new();
        let mut brand_ids: BTreeSet<String> = BTreeSet::new();
        for detail in details.iter().flatten() {
            if let Some(id) = detail.product_id {
                product_ids.insert(id.to_string());
            }
            if let Some(id) = detail.category_id {
                category_ids.insert(id.to_string());
            }
            if let Some(id) = detail.brand_id
                && detail.brand_name.as_deref().unwrap_or("").is_empty()
            {
                brand_ids.insert(id.to_string());
            }
        }

        let lookup_total = product_ids.len() + category_ids.len() + brand_ids.len();
        sink.set_total(lookup_total as u64);
        sink.log(&format!(
            "Fase 2: {} productos, {} categorias, {} marcas unicas ({lookup_total} consultas)...",
            product_ids.len(),
            category_ids.len(),
            brand_ids.len()
        ));

        let products: Arc<MemoCache<String, ProductRef>> = Arc::new(MemoCache::new());
        let categories: Arc<MemoCache<String, CategoryRef>> = Arc::new(MemoCache::new());
        let brands: Arc<MemoCache<String, BrandRef>> = Arc::new(MemoCache::new());

        self.fetch_lookups(
            context,
            product_ids.iter().cloned().map(LookupTask::Product)
                .chain(category_ids.iter().cloned().map(LookupTask::Category))
                .chain(brand_ids.iter().cloned().map(LookupTask::Brand))
                .collect(),
            &products,
            &categories,
            &brands,
            &sink,
        )
        .await;

        // Departments hang off the cached products and reuse the category
        // endpoint and cache; this top-up is not part of the phase total.
        let department_ids: Vec<String> = product_ids
            .iter()
            .filter_map(|id| products.get(id).flatten())
            .filter_map(|product| product.department_id)
            .map(|id| id.to_string())
            .filter(|id| !categories.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !department_ids.is_empty() {
            sink.log(&format!(
                "  + {} departamentos adicionales...",
                department_ids.len()
            ));
            self.fetch_departments(context, department_ids, &categories).await;
        }

        // Fase 3 (optional): price and stock, interleaved.
        let mut prices: HashMap<u64, f64> = HashMap::new();
        let mut stocks: HashMap<u64, StockSummary> = HashMap::new();
        if context.with_price_stock {
            sink.set_total(total as u64 * 2);
            sink.log(&format!(
                "Fase 3: obteniendo precio y stock de {total} SKUs ({} workers)...",
                self.config.quote_workers
            ));
            let quotes = self.fetch_quotes(context, &sku_ids, &sink).await;
            for quote in quotes {
                match quote {
                    QuoteOutcome::Price(id, Some(price)) => {
                        prices.insert(id, price);
                    }
                    QuoteOutcome::Stock(id, Some(stock)) => {
                        stocks.insert(id, stock);
                    }
                    _ => {}
                }
            }
        } else {
            sink.log("Precio/Stock omitido (no solicitado).");
        }

        sink.log(&format!(
            "Fase final: construyendo {total} filas ({} columnas)...",
            crate::assemble::EXPORT_COLUMNS.len()
        ));
        let rows = build_rows(
            &sku_ids,
            &details,
            &AssemblyContext {
                products: &products,
                categories: &categories,
                brands: &brands,
                prices: &prices,
                stocks: &stocks,
                channel_filter: &context.channel_filter,
                with_price_stock: context.with_price_stock,
            },
        );

        crate::metrics::phase_elapsed("export_total", started.elapsed().as_millis());
        sink.log(&format!("Export finalizado. {total} SKUs procesados."));
        Ok(rows)
    }

    async fn fetch_details(
        &self,
        context: &RunContext,
        sku_ids: &[u64],
        sink: &Arc<dyn ProgressSink>,
    ) -> Vec<Option<SkuDetail>> {
        let batcher = Arc::new(ProgressBatcher::new(
            sink.clone(),
            self.config.progress_flush_every,
        ));
        let client = context.client.clone();
        run_phase(
            sku_ids.to_vec(),
            self.config.fetch_workers,
            batcher,
            move |sku_id| {
                let client = client.clone();
                // A failed or absent detail both collapse to None here; the
                // assembler turns that into the explicit stub row.
                async move { catalog::get_sku_by_id(&client, sku_id).await.ok().flatten() }
            },
            || None,
        )
        .await
    }

    async fn fetch_lookups(
        &self,
        context: &RunContext,
        tasks: Vec<LookupTask>,
        products: &Arc<MemoCache<String, ProductRef>>,
        categories: &Arc<MemoCache<String, CategoryRef>>,
        brands: &Arc<MemoCache<String, BrandRef>>,
        sink: &Arc<dyn ProgressSink>,
    ) {
        let batcher = Arc::new(ProgressBatcher::new(
            sink.clone(),
            self.config.progress_flush_every,
        ));
        let client = context.client.clone();
        let products = products.clone();
        let categories = categories.clone();
        let brands = brands.clone();
        run_phase(
            tasks,
            self.config.fetch_workers,
            batcher,
            move |task| {
                let client = client.clone();
                let products = products.clone();
                let categories = categories.clone();
                let brands = brands.clone();
                async move {
                    match task {
                        LookupTask::Product(id) => {
                            products
                                .get_or_fetch(id.clone(), || async {
                                    catalog::get_product(&client, &id).await.ok().flatten()
                                })
                                .await;
                        }
                        LookupTask::Category(id) => {
                            categories
                                .get_or_fetch(id.clone(), || async {
                                    catalog::get_category(&client, &id).await.ok().flatten()
                                })
                                .await;
                        }
                        LookupTask::Brand(id) => {
                            brands
                                .get_or_fetch(id.clone(), || async {
                                    catalog::get_brand(&client, &id).await.ok().flatten()
                                })
                                .await;
                        }
                    }
                }
            },
            || (),
        )
        .await;
    }

    async fn fetch_departments(
        &self,
        context: &RunContext,
        department_ids: Vec<String>,
        categories: &Arc<MemoCache<String, CategoryRef>>,
    ) {
        let batcher = Arc::new(ProgressBatcher::new(
            Arc::new(NullSink),
            self.config.progress_flush_every,
        ));
        let client = context.client.clone();
        let categories = categories.clone();
        run_phase(
            department_ids,
            self.config.fetch_workers,
            batcher,
            move |id| {
                let client = client.clone();
                let categories = categories.clone();
                async move {
                    categories
                        .get_or_fetch(id.clone(), || async {
                            catalog::get_category(&client, &id).await.ok().flatten()
                        })
                        .await;
                }
            },
            || (),
        )
        .await;
    }

    async fn fetch_quotes(
        &self,
        context: &RunContext,
        sku_ids: &[u64],
        sink: &Arc<dyn ProgressSink>,
    ) -> Vec<QuoteOutcome> {
        let batcher = Arc::new(ProgressBatcher::new(
            sink.clone(),
            self.config.progress_flush_every,
        ));
        let mut tasks = Vec::with_capacity(sku_ids.len() * 2);
        for sku_id in sku_ids {
            tasks.push(QuoteTask::Price(*sku_id));
            tasks.push(QuoteTask::Stock(*sku_id));
        }
        let client = context.client.clone();
        run_phase(
            tasks,
            self.config.quote_workers,
            batcher,
            move |task| {
                let client = client.clone();
                async move {
                    match task {
                        QuoteTask::Price(id) => QuoteOutcome::Price(
                            id,
                            pricing::get_base_price(&client, id).await.ok().flatten(),
                        ),
                        QuoteTask::Stock(id) => QuoteOutcome::Stock(
                            id,
                            inventory::get_inventory(&client, id).await.ok().flatten(),
                        ),
                    }
                }
            },
            || QuoteOutcome::Missed,
        )
        .await
    }
}
