use crate::{
    core::identifiers::{DatasetId, RunId, TaskId},
    execution::{
        operation::{OperationKind, OperationSpec, Trigger, Variant},
        output::TaskOutput,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and Failed are the two terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One point-in-time reading taken while an operation ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Reconciled measurements for a task across all chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub input_rows: u64,
    /// None for aggregation, whose output is not row-shaped.
    pub output_rows: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub samples: Vec<ResourceSample>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("iteration must be at least 1, got {0}")]
    InvalidIteration(u32),
    #[error("operation '{0}' is not among the run's actions")]
    KindNotInActions(OperationKind),
}

/// Everything the caller decides about a task; the rest (id, kind,
/// status, timestamps) is derived at construction.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub run_id: RunId,
    pub dataset_id: DatasetId,
    pub dataset_version: u64,
    pub variant: Variant,
    pub trigger: Trigger,
    pub iteration: u32,
    pub actions: Vec<OperationKind>,
    pub spec: OperationSpec,
}

/// The unit of execution, measurement and validation: one operation of
/// one run, processed by one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub run_id: RunId,
    pub dataset_id: DatasetId,
    /// Dataset version the run was planned against; a reload invalidates
    /// scheduled expansion for this task.
    pub dataset_version: u64,
    pub kind: OperationKind,
    pub variant: Variant,
    pub trigger: Trigger,
    pub iteration: u32,
    /// Active operations of the owning run, in pipeline order.
    pub actions: Vec<OperationKind>,
    pub spec: OperationSpec,
    pub status: TaskStatus,
    pub validated: bool,
    pub valid: bool,
    pub metrics: TaskMetrics,
    pub output: Option<TaskOutput>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Builds a Pending task. The operation kind is taken from the
    /// pipeline entry; iterations start at 1 and the kind must be one
    /// of the run's active actions.
    pub fn new(new: NewTask) -> Result<Self, TaskError> {
        if new.iteration < 1 {
            return Err(TaskError::InvalidIteration(new.iteration));
        }
        let kind = new.spec.kind();
        if !new.actions.contains(&kind) {
            return Err(TaskError::KindNotInActions(kind));
        }
        let now = Utc::now();
        Ok(Task {
            id: TaskId::new(),
            run_id: new.run_id,
            dataset_id: new.dataset_id,
            dataset_version: new.dataset_version,
            kind,
            variant: new.variant,
            trigger: new.trigger,
            iteration: new.iteration,
            actions: new.actions,
            spec: new.spec,
            status: TaskStatus::Pending,
            validated: false,
            valid: false,
            metrics: TaskMetrics::default(),
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operation::Predicate;
    use crate::{core::value::Value, execution::operation::FilterOp};

    fn new_task(iteration: u32, actions: Vec<OperationKind>) -> Result<Task, TaskError> {
        Task::new(NewTask {
            run_id: RunId::new(),
            dataset_id: DatasetId::new(),
            dataset_version: 1,
            variant: Variant::Baseline,
            trigger: Trigger::User,
            iteration,
            actions,
            spec: OperationSpec::Filter {
                predicates: vec![Predicate::new("age", FilterOp::Gt, Value::Int(30))],
            },
        })
    }

    #[test]
    fn new_task_starts_pending_and_unvalidated() {
        let task = new_task(1, vec![OperationKind::Filter]).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.kind, OperationKind::Filter);
        assert!(!task.validated);
        assert!(!task.valid);
        assert!(task.output.is_none());
    }

    #[test]
    fn iteration_zero_is_rejected() {
        let err = new_task(0, vec![OperationKind::Filter]).unwrap_err();
        assert_eq!(err, TaskError::InvalidIteration(0));
    }

    #[test]
    fn kind_must_be_an_active_action() {
        let err = new_task(1, vec![OperationKind::Group]).unwrap_err();
        assert_eq!(err, TaskError::KindNotInActions(OperationKind::Filter));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }
}
