use crate::assemble::OutputRow;
use crate::audit::AuditStore;
use crate::models::{ApiError, ExportJobRequest, VisibilityJobRequest};
use crate::pipeline::{CatalogExportService, PipelineError, RunContext};
use crate::progress::ProgressSink;
use crate::visibility::{VisibilityOutcome, VisibilityService};
use crate::vtex::config::AccountRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Serialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub line: String,
}

/// The task entity behind a job id: state, counters and an append-only log.
/// The pipeline writes to it through `ProgressSink`; the API reads it whole.
#[derive(Clone, Serialize)]
pub struct TaskRecord {
    pub state: TaskState,
    pub progress_total: u64,
    pub progress_current: u64,
    pub logs: Vec<LogLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self {
            state: TaskState::Queued,
            progress_total: 0,
            progress_current: 0,
            logs: Vec::new(),
            error: None,
            result: None,
        }
    }
}

#[derive(Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    Export { rows: Vec<OutputRow> },
    Visibility { outcomes: Vec<VisibilityOutcome> },
}

#[derive(Clone, Default)]
pub struct TaskStore {
    inner: Arc<Mutex<HashMap<Uuid, TaskRecord>>>,
}

impl TaskStore {
    fn create(&self, id: Uuid) {
        let mut guard = self.inner.lock().expect("task store poisoned");
        guard.insert(id, TaskRecord::default());
    }

    fn update(&self, id: Uuid, apply: impl FnOnce(&mut TaskRecord)) {
        let mut guard = self.inner.lock().expect("task store poisoned");
        if let Some(record) = guard.get_mut(&id) {
            apply(record);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<TaskRecord> {
        let guard = self.inner.lock().expect("task store poisoned");
        guard.get(&id).cloned()
    }

    pub fn handle(&self, id: Uuid) -> TaskHandle {
        TaskHandle {
            store: self.clone(),
            id,
        }
    }
}

/// Write-side view of one task, handed to the pipeline as its progress sink.
pub struct TaskHandle {
    store: TaskStore,
    id: Uuid,
}

impl ProgressSink for TaskHandle {
    /// Announces a new phase: sets the expected unit count and rewinds the
    /// counter, which then grows monotonically within the phase.
    fn set_total(&self, total: u64) {
        self.store.update(self.id, |record| {
            record.progress_total = total;
            record.progress_current = 0;
        });
    }

    /// Read-modify-write under the store lock, so concurrent flushes from
    /// worker tasks never lose increments.
    fn add_progress(&self, amount: u64) {
        self.store.update(self.id, |record| {
            record.progress_current += amount;
        });
    }

    fn log(&self, line: &str) {
        self.store.update(self.id, |record| {
            record.logs.push(LogLine {
                at: Utc::now(),
                line: line.to_string(),
            });
        });
    }
}

#[derive(Clone)]
pub enum JobRequest {
    Export(ExportJobRequest),
    Visibility(VisibilityJobRequest),
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    request: JobRequest,
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub record: TaskRecord,
}

/// Background worker: jobs are queued over a channel and run one at a time,
/// publishing state and progress through the task store.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    store: TaskStore,
}

impl JobQueue {
    pub fn spawn(
        export: CatalogExportService,
        visibility: VisibilityService,
        registry: AccountRegistry,
        audit: Option<Arc<AuditStore>>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let store = TaskStore::default();
        let store_bg = store.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                store_bg.update(job.id, |record| record.state = TaskState::Running);
                info!(target = "vitrina.jobs", job_id = %job.id, "job started");

                let sink: Arc<dyn ProgressSink> = Arc::new(store_bg.handle(job.id));
                let result = run_job(
                    &export,
                    &visibility,
                    &registry,
                    audit.clone(),
                    job.request,
                    sink.clone(),
                )
                .await;

                match result {
                    Ok(outcome) => {
                        store_bg.update(job.id, |record| {
                            record.state = TaskState::Completed;
                            record.result = Some(outcome);
                        });
                    }
                    Err(err) => {
                        sink.log(&format!("Error: {err}"));
                        store_bg.update(job.id, |record| {
                            record.state = TaskState::Failed;
                            record.error = Some(err.to_string());
                        });
                    }
                }
            }
        });

        (Self { tx, store }, handle)
    }

    pub async fn enqueue(&self, request: JobRequest) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        self.store.create(id);
        self.tx.send(Job { id, request }).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.store.get(id).map(|record| JobInfo {
            id: id.to_string(),
            record,
        })
    }
}

async fn run_job(
    export: &CatalogExportService,
    visibility: &VisibilityService,
    registry: &AccountRegistry,
    audit: Option<Arc<AuditStore>>,
    request: JobRequest,
    sink: Arc<dyn ProgressSink>,
) -> Result<JobResult, PipelineError> {
    match request {
        JobRequest::Export(request) => {
            let context = RunContext::for_account(
                registry,
                &request.account,
                request.sales_channels.clone(),
                request.include_price_stock,
                export.config(),
            )?;
            let rows = export.run(&context, sink).await?;
            Ok(JobResult::Export { rows })
        }
        JobRequest::Visibility(request) => {
            let targets = request.targets();
            if targets.is_empty() {
                return Err(PipelineError::invalid_input(
                    "visibility",
                    "no sku_ids or eans provided",
                ));
            }
            let context = RunContext::for_account(
                registry,
                &request.account,
                None,
                true,
                export.config(),
            )?;
            let outcomes = visibility.run(&context, targets, sink, audit).await;
            Ok(JobResult::Visibility { outcomes })
        }
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use tokio::time::{Duration, sleep};

    fn queue() -> (JobQueue, JoinHandle<()>) {
        let config = PipelineConfig::default();
        JobQueue::spawn(
            CatalogExportService::new(config.clone()),
            VisibilityService::new(config),
            AccountRegistry::default(),
            None,
        )
    }

    #[tokio::test]
    async fn unknown_account_fails_the_job_with_a_logged_error() {
        let (queue, _worker) = queue();
        let id = queue
            .enqueue(JobRequest::Export(ExportJobRequest {
                account: "fantasma".to_string(),
                sales_channels: None,
                include_price_stock: true,
            }))
            .await
            .expect("enqueue");

        for _ in 0..50 {
            if let Some(info) = queue.get(id)
                && info.record.state == TaskState::Failed
            {
                assert!(
                    info.record.error.as_deref().unwrap_or("").contains("fantasma"),
                    "error should name the account"
                );
                assert!(!info.record.logs.is_empty());
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached Failed");
    }

    #[tokio::test]
    async fn visibility_without_targets_is_invalid_input() {
        let (queue, _worker) = queue();
        let id = queue
            .enqueue(JobRequest::Visibility(VisibilityJobRequest {
                account: "tienda".to_string(),
                sku_ids: Vec::new(),
                eans: Vec::new(),
            }))
            .await
            .expect("enqueue");

        for _ in 0..50 {
            if let Some(info) = queue.get(id)
                && info.record.state == TaskState::Failed
            {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached Failed");
    }

    #[test]
    fn task_handle_resets_counter_per_phase_and_accumulates() {
        let store = TaskStore::default();
        let id = Uuid::new_v4();
        store.create(id);
        let handle = store.handle(id);

        handle.set_total(10);
        handle.add_progress(4);
        handle.add_progress(6);
        let record = store.get(id).expect("record");
        assert_eq!(record.progress_total, 10);
        assert_eq!(record.progress_current, 10);

        handle.set_total(20);
        let record = store.get(id).expect("record");
        assert_eq!(record.progress_total, 20);
        assert_eq!(record.progress_current, 0);

        handle.log("Fase 2: consultas...");
        let record = store.get(id).expect("record");
        assert_eq!(record.logs.len(), 1);
        assert_eq!(record.logs[0].line, "Fase 2: consultas...");
    }

    #[tokio::test]
    async fn unknown_job_id_is_none() {
        let (queue, _worker) = queue();
        assert!(queue.get(Uuid::new_v4()).is_none());
    }
}
