use crate::error::StoreError;
use async_trait::async_trait;
use model::{
    core::identifiers::{DatasetId, JobId, RunId, TaskId},
    execution::{
        job::{Job, JobRequest},
        operation::Trigger,
        output::BatchResult,
        task::{Task, TaskStatus},
    },
    records::{
        dataset::Dataset,
        row::{FieldValue, Row},
    },
};

pub mod keys;
pub mod sled_store;

/// Conjunction of optional task predicates; `None` fields match
/// anything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub dataset_id: Option<DatasetId>,
    pub run_id: Option<RunId>,
    pub iteration: Option<u32>,
    pub trigger: Option<Trigger>,
    pub status: Option<TaskStatus>,
    pub validated: Option<bool>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn dataset(mut self, id: DatasetId) -> Self {
        self.dataset_id = Some(id);
        self
    }

    pub fn run(mut self, id: RunId) -> Self {
        self.run_id = Some(id);
        self
    }

    pub fn iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn validated(mut self, validated: bool) -> Self {
        self.validated = Some(validated);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.dataset_id.is_none_or(|id| task.dataset_id == id)
            && self.run_id.is_none_or(|id| task.run_id == id)
            && self.iteration.is_none_or(|i| task.iteration == i)
            && self.trigger.is_none_or(|t| task.trigger == t)
            && self.status.is_none_or(|s| task.status == s)
            && self.validated.is_none_or(|v| task.validated == v)
    }
}

#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn insert_dataset(&self, dataset: &Dataset) -> Result<(), StoreError>;
    async fn get_dataset(&self, id: DatasetId) -> Result<Option<Dataset>, StoreError>;
    async fn find_dataset_by_name(&self, name: &str) -> Result<Option<Dataset>, StoreError>;
    async fn list_datasets(&self) -> Result<Vec<Dataset>, StoreError>;
    async fn update_dataset(&self, dataset: &Dataset) -> Result<(), StoreError>;
    async fn delete_dataset(&self, id: DatasetId) -> Result<(), StoreError>;

    /// Appends rows, assigning consecutive ids starting where the last
    /// ingestion stopped (0 after a `delete_rows`). Returns the count.
    async fn insert_rows(
        &self,
        id: DatasetId,
        rows: Vec<Vec<FieldValue>>,
    ) -> Result<u64, StoreError>;
    /// Rows in ascending id order, starting at offset `skip`.
    async fn page_rows(&self, id: DatasetId, skip: u64, limit: u64)
    -> Result<Vec<Row>, StoreError>;
    async fn count_rows(&self, id: DatasetId) -> Result<u64, StoreError>;
    async fn delete_rows(&self, id: DatasetId) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;
    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;
    /// Matching tasks ordered by creation time, then id.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;
    async fn delete_tasks_for_dataset(&self, id: DatasetId) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write-once: a second result for the same (task, chunk) is an
    /// error, batch results are immutable.
    async fn append_result(&self, result: &BatchResult) -> Result<(), StoreError>;
    /// Results in ascending chunk order, `skip`/`limit` in result counts.
    async fn results_for_task(
        &self,
        task: TaskId,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<BatchResult>, StoreError>;
    async fn delete_results_for_task(&self, task: TaskId) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, request: JobRequest) -> Result<JobId, StoreError>;
    /// Atomically removes and returns the oldest job, if any.
    async fn claim_next(&self) -> Result<Option<Job>, StoreError>;
    async fn queue_len(&self) -> Result<usize, StoreError>;
}

/// Everything the engine needs from persistence, in one object-safe
/// bundle.
pub trait EngineStore: DatasetStore + TaskStore + ResultStore + JobQueue {}

impl<T: DatasetStore + TaskStore + ResultStore + JobQueue> EngineStore for T {}
