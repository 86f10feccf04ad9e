use engine_core::StoreError;
use model::core::identifiers::{DatasetId, RunId, TaskId};
use model::execution::task::TaskError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dataset {0} not found")]
    DatasetNotFound(DatasetId),

    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("invalid run: {0}")]
    InvalidRun(String),

    #[error("inconsistent batch results for task {task}: {detail}")]
    InconsistentResults { task: TaskId, detail: String },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("task error: {0}")]
    Task(#[from] TaskError),
}
