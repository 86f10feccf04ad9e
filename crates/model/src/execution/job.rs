use crate::core::identifiers::{DatasetId, JobId, RunId};
use crate::execution::operation::{OperationKind, Trigger};
use serde::{Deserialize, Serialize};

/// Work items the dispatcher understands. The set is closed: adding a
/// job type means adding a variant and a handler arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobRequest {
    /// Execute one iteration of a run: chunk the dataset, process every
    /// pending task of the iteration and reconcile.
    StartRun {
        run_id: RunId,
        dataset_id: DatasetId,
        actions: Vec<OperationKind>,
        iteration: u32,
        trigger: Trigger,
    },
    /// Compare outputs of completed, unvalidated tasks.
    ValidateRuns,
    /// Expand eligible user runs into scheduled iterations.
    PrepareScheduledRuns,
    /// Drop all tasks and batch results of a dataset.
    ResetRuns { dataset_id: DatasetId },
    /// Drop a dataset with its rows, tasks and batch results.
    DeleteDataset { dataset_id: DatasetId },
}

impl JobRequest {
    /// Stable name used in dispatcher logs.
    pub fn name(&self) -> &'static str {
        match self {
            JobRequest::StartRun { .. } => "start_run",
            JobRequest::ValidateRuns => "validate_runs",
            JobRequest::PrepareScheduledRuns => "prepare_scheduled_runs",
            JobRequest::ResetRuns { .. } => "reset_runs",
            JobRequest::DeleteDataset { .. } => "delete_dataset",
        }
    }
}

/// A claimed queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: JobRequest,
}
