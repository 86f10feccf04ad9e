//! Execution runtime: run planning, the chunked orchestrator, batch
//! reconciliation, output validation and the job dispatcher, tied
//! together by [`Engine`].

use std::sync::Arc;

use engine_core::settings::EngineSettings;
use engine_core::store::sled_store::SledStore;
use engine_core::store::{EngineStore, JobQueue, TaskFilter};
use model::core::column::Schema;
use model::core::identifiers::{DatasetId, JobId, RunId};
use model::execution::job::JobRequest;
use model::execution::operation::OperationSpec;
use model::records::dataset::Dataset;
use model::records::row::FieldValue;
use tokio_util::sync::CancellationToken;

mod datasets;
mod dispatcher;
pub mod error;
mod orchestrator;
mod reconciler;
mod runs;
mod validator;

pub use error::EngineError;
pub use runs::{RunSummary, TaskPage};
pub use validator::EPSILON;

/// Handle to the engine: the persistent store plus runtime settings.
/// Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn EngineStore>,
    pub settings: EngineSettings,
}

impl Engine {
    pub fn new(store: Arc<dyn EngineStore>, settings: EngineSettings) -> Self {
        Engine { store, settings }
    }

    /// Opens the embedded store at the configured state directory.
    pub fn open(settings: EngineSettings) -> Result<Self, EngineError> {
        let store = SledStore::open(&settings.state_dir)?;
        Ok(Engine::new(Arc::new(store), settings))
    }

    /// Ingests rows under a dataset name. An existing dataset of the
    /// same name has its rows replaced and its version bumped.
    pub async fn register_dataset(
        &self,
        name: &str,
        schema: Schema,
        rows: Vec<Vec<FieldValue>>,
    ) -> Result<Dataset, EngineError> {
        datasets::register_dataset(self, name, schema, rows).await
    }

    /// Validates a submission and queues iteration 1 of a new run.
    pub async fn create_run(
        &self,
        dataset_id: DatasetId,
        operations: Vec<OperationSpec>,
    ) -> Result<RunSummary, EngineError> {
        runs::create_run(self, dataset_id, operations).await
    }

    /// Queues the next iteration of a finished run.
    pub async fn iterate_run(&self, run_id: RunId) -> Result<RunSummary, EngineError> {
        runs::iterate_run(self, run_id).await
    }

    /// Pages tasks matching the filter.
    pub async fn task_status(
        &self,
        filter: &TaskFilter,
        skip: u64,
        limit: u64,
    ) -> Result<TaskPage, EngineError> {
        runs::task_status(self, filter, skip, limit).await
    }

    /// Queues a job without waiting for it.
    pub async fn enqueue_job(&self, request: JobRequest) -> Result<JobId, EngineError> {
        Ok(self.store.enqueue(request).await?)
    }

    /// Executes queued jobs until the queue is empty. Returns how many
    /// jobs ran.
    pub async fn drain_queue(&self) -> Result<usize, EngineError> {
        dispatcher::drain(self).await
    }

    /// Claims and executes jobs until cancelled.
    pub async fn run_dispatcher(&self, cancel: CancellationToken) {
        dispatcher::run_loop(self, cancel).await
    }
}
