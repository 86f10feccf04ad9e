//! Run planning: submission, iteration, scheduled expansion and
//! cleanup.
//!
//! Submissions are validated against the dataset schema before any
//! task is created, so a malformed run is rejected synchronously and
//! never reaches the queue.

use std::collections::{BTreeMap, HashSet};

use engine_core::store::{DatasetStore, ResultStore, TaskFilter, TaskStore};
use model::core::column::{ColumnType, Schema};
use model::core::identifiers::{DatasetId, JobId, RunId, TaskId};
use model::core::value::Value;
use model::execution::job::JobRequest;
use model::execution::operation::{
    AggregateColumn, OperationKind, OperationSpec, Predicate, Trigger, Variant,
};
use model::execution::task::{NewTask, Task, TaskStatus};
use model::records::dataset::Dataset;
use serde::Serialize;
use tracing::info;

use crate::Engine;
use crate::error::EngineError;

/// Status pages never exceed this many tasks.
const MAX_PAGE_LIMIT: u64 = 100;

/// What a submission or iteration produced: the planned tasks and the
/// queued job that will execute them.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub dataset_id: DatasetId,
    pub iteration: u32,
    pub trigger: Trigger,
    pub task_ids: Vec<TaskId>,
    pub job_id: JobId,
}

/// One page of a task status query.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub skip: u64,
    pub limit: u64,
    pub total: u64,
}

/// Validates a submission and plans iteration 1: a baseline and a
/// candidate task per operation, plus the job that executes them.
pub(crate) async fn create_run(
    engine: &Engine,
    dataset_id: DatasetId,
    operations: Vec<OperationSpec>,
) -> Result<RunSummary, EngineError> {
    let dataset = engine
        .store
        .get_dataset(dataset_id)
        .await?
        .ok_or(EngineError::DatasetNotFound(dataset_id))?;
    validate_operations(&dataset.schema, &operations)?;

    let run_id = RunId::new();
    submit_iteration(engine, &dataset, run_id, &operations, Trigger::User, 1).await
}

/// Re-runs a finished run as iteration N+1 with the same operations.
pub(crate) async fn iterate_run(engine: &Engine, run_id: RunId) -> Result<RunSummary, EngineError> {
    let filter = TaskFilter::all()
        .run(run_id)
        .trigger(Trigger::User);
    let tasks = engine.store.list_tasks(&filter).await?;
    if tasks.is_empty() {
        return Err(EngineError::RunNotFound(run_id));
    }

    let dataset_id = tasks[0].dataset_id;
    let dataset = engine
        .store
        .get_dataset(dataset_id)
        .await?
        .ok_or(EngineError::DatasetNotFound(dataset_id))?;

    let latest = tasks.iter().map(|t| t.iteration).max().unwrap_or(1);
    let current: Vec<&Task> = tasks.iter().filter(|t| t.iteration == latest).collect();
    if current.iter().any(|t| !t.status.is_terminal()) {
        return Err(EngineError::InvalidRun(format!(
            "iteration {latest} has not finished"
        )));
    }
    if current.iter().any(|t| t.dataset_version != dataset.version) {
        return Err(EngineError::InvalidRun(
            "dataset was re-ingested since the run was created".into(),
        ));
    }

    let operations = pipeline_of(&current);
    submit_iteration(engine, &dataset, run_id, &operations, Trigger::User, latest + 1).await
}

/// Expands every eligible run into scheduled iterations. A run is
/// eligible when its single user iteration completed on the current
/// dataset version and it has never been expanded. Skipped entirely
/// while any task is still pending or in progress.
pub(crate) async fn prepare_scheduled_runs(engine: &Engine) -> Result<(), EngineError> {
    let tasks = engine
        .store
        .list_tasks(&TaskFilter::all())
        .await?;
    if tasks.iter().any(|t| !t.status.is_terminal()) {
        info!("scheduled expansion skipped, tasks still pending or in progress");
        return Ok(());
    }

    let expanded: HashSet<RunId> = tasks
        .iter()
        .filter(|t| t.trigger == Trigger::System)
        .map(|t| t.run_id)
        .collect();

    let mut by_run: BTreeMap<RunId, Vec<&Task>> = BTreeMap::new();
    for task in tasks.iter().filter(|t| t.trigger == Trigger::User) {
        by_run.entry(task.run_id).or_default().push(task);
    }

    for (run_id, run_tasks) in by_run {
        if expanded.contains(&run_id) {
            continue;
        }
        // Iterated or partially failed runs are not worth repeating.
        if run_tasks.iter().any(|t| t.iteration > 1) {
            continue;
        }
        if run_tasks.iter().any(|t| t.status != TaskStatus::Completed) {
            continue;
        }
        let Some(dataset) = engine.store.get_dataset(run_tasks[0].dataset_id).await? else {
            continue;
        };
        if run_tasks.iter().any(|t| t.dataset_version != dataset.version) {
            continue;
        }

        let operations = pipeline_of(&run_tasks);
        for iteration in 1..=engine.settings.scheduled_iterations {
            submit_iteration(engine, &dataset, run_id, &operations, Trigger::System, iteration)
                .await?;
        }
        info!(
            %run_id,
            iterations = engine.settings.scheduled_iterations,
            "run expanded into scheduled iterations"
        );
    }
    Ok(())
}

/// Drops every task and batch result belonging to a dataset. Rows and
/// the dataset itself stay.
pub(crate) async fn reset_runs(engine: &Engine, dataset_id: DatasetId) -> Result<(), EngineError> {
    let filter = TaskFilter::all().dataset(dataset_id);
    let tasks = engine.store.list_tasks(&filter).await?;
    for task in &tasks {
        engine.store.delete_results_for_task(task.id).await?;
    }
    let removed = engine.store.delete_tasks_for_dataset(dataset_id).await?;
    info!(%dataset_id, tasks = removed, "runs reset");
    Ok(())
}

/// Drops a dataset with everything derived from it.
pub(crate) async fn delete_dataset(
    engine: &Engine,
    dataset_id: DatasetId,
) -> Result<(), EngineError> {
    reset_runs(engine, dataset_id).await?;
    let rows = engine.store.delete_rows(dataset_id).await?;
    engine.store.delete_dataset(dataset_id).await?;
    info!(%dataset_id, rows, "dataset deleted");
    Ok(())
}

/// Pages matching tasks, newest-submitted last, capping the page size.
pub(crate) async fn task_status(
    engine: &Engine,
    filter: &TaskFilter,
    skip: u64,
    limit: u64,
) -> Result<TaskPage, EngineError> {
    let limit = limit.clamp(1, MAX_PAGE_LIMIT);
    let all = engine.store.list_tasks(filter).await?;
    let total = all.len() as u64;
    let tasks = all
        .into_iter()
        .skip(skip as usize)
        .take(limit as usize)
        .collect();
    Ok(TaskPage {
        tasks,
        skip,
        limit,
        total,
    })
}

/// Inserts the tasks of one iteration and queues its execution.
async fn submit_iteration(
    engine: &Engine,
    dataset: &Dataset,
    run_id: RunId,
    operations: &[OperationSpec],
    trigger: Trigger,
    iteration: u32,
) -> Result<RunSummary, EngineError> {
    let actions: Vec<OperationKind> = operations.iter().map(|spec| spec.kind()).collect();
    let mut task_ids = Vec::with_capacity(operations.len() * 2);
    for spec in operations {
        for variant in [Variant::Baseline, Variant::Candidate] {
            let task = Task::new(NewTask {
                run_id,
                dataset_id: dataset.id,
                dataset_version: dataset.version,
                variant,
                trigger,
                iteration,
                actions: actions.clone(),
                spec: spec.clone(),
            })?;
            engine.store.insert_task(&task).await?;
            task_ids.push(task.id);
        }
    }
    let job_id = engine
        .store
        .enqueue(JobRequest::StartRun {
            run_id,
            dataset_id: dataset.id,
            actions: actions.clone(),
            iteration,
            trigger,
        })
        .await?;
    info!(
        %run_id,
        dataset_id = %dataset.id,
        iteration,
        %trigger,
        ?actions,
        %job_id,
        "iteration queued"
    );
    Ok(RunSummary {
        run_id,
        dataset_id: dataset.id,
        iteration,
        trigger,
        task_ids,
        job_id,
    })
}

/// Reconstructs the operation list of an iteration from its baseline
/// tasks, in pipeline order.
fn pipeline_of(tasks: &[&Task]) -> Vec<OperationSpec> {
    let mut specs: Vec<(OperationKind, OperationSpec)> = tasks
        .iter()
        .filter(|t| t.variant == Variant::Baseline)
        .map(|t| (t.kind, t.spec.clone()))
        .collect();
    specs.sort_by_key(|(kind, _)| *kind);
    specs.into_iter().map(|(_, spec)| spec).collect()
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidRun(message.into())
}

fn unknown_column(schema: &Schema, name: &str) -> EngineError {
    invalid(format!(
        "unknown column '{}', the dataset has: {}",
        name,
        schema.names().collect::<Vec<_>>().join(", ")
    ))
}

/// Checks a submission against the dataset schema: every referenced
/// column must exist, ordering operators need number columns and
/// numeric literals, `contains` needs strings, and aggregation only
/// works on number columns.
fn validate_operations(schema: &Schema, operations: &[OperationSpec]) -> Result<(), EngineError> {
    if operations.is_empty() {
        return Err(invalid("a run needs at least one operation"));
    }
    let mut seen = HashSet::new();
    for spec in operations {
        if !seen.insert(spec.kind()) {
            return Err(invalid(format!("duplicate {} operation", spec.kind())));
        }
        match spec {
            OperationSpec::Filter { predicates } => validate_filter(schema, predicates)?,
            OperationSpec::Group { keys } => validate_group(schema, keys)?,
            OperationSpec::Aggregate { columns } => validate_aggregate(schema, columns)?,
        }
    }
    Ok(())
}

fn validate_filter(schema: &Schema, predicates: &[Predicate]) -> Result<(), EngineError> {
    if predicates.is_empty() {
        return Err(invalid("filter needs at least one predicate"));
    }
    for predicate in predicates {
        let Some(column) = schema.column(&predicate.column) else {
            return Err(unknown_column(schema, &predicate.column));
        };
        if predicate.op.requires_number() {
            if column.column_type != ColumnType::Number {
                return Err(invalid(format!(
                    "operator {} needs a number column, '{}' is {}",
                    predicate.op, column.name, column.column_type
                )));
            }
            if !matches!(predicate.value, Value::Int(_) | Value::Float(_)) {
                return Err(invalid(format!(
                    "operator {} needs a numeric value for '{}'",
                    predicate.op, column.name
                )));
            }
        } else if predicate.op.requires_string() {
            if column.column_type != ColumnType::String {
                return Err(invalid(format!(
                    "operator {} needs a string column, '{}' is {}",
                    predicate.op, column.name, column.column_type
                )));
            }
            if !matches!(predicate.value, Value::String(_)) {
                return Err(invalid(format!(
                    "operator {} needs a string value for '{}'",
                    predicate.op, column.name
                )));
            }
        } else {
            // Equality still needs a literal of the column's type.
            let compatible = match column.column_type {
                ColumnType::Number => matches!(predicate.value, Value::Int(_) | Value::Float(_)),
                ColumnType::String => matches!(predicate.value, Value::String(_)),
            };
            if !compatible {
                return Err(invalid(format!(
                    "value {} does not match the {} column '{}'",
                    predicate.value, column.column_type, column.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_group(schema: &Schema, keys: &[String]) -> Result<(), EngineError> {
    if keys.is_empty() {
        return Err(invalid("grouping needs at least one key column"));
    }
    for key in keys {
        if !schema.contains(key) {
            return Err(unknown_column(schema, key));
        }
    }
    Ok(())
}

fn validate_aggregate(schema: &Schema, columns: &[AggregateColumn]) -> Result<(), EngineError> {
    if columns.is_empty() {
        return Err(invalid("aggregation needs at least one column"));
    }
    for column in columns {
        let Some(def) = schema.column(&column.column) else {
            return Err(unknown_column(schema, &column.column));
        };
        if def.column_type != ColumnType::Number {
            return Err(invalid(format!(
                "aggregation needs a number column, '{}' is {}",
                def.name, def.column_type
            )));
        }
        if column.functions.is_empty() {
            return Err(invalid(format!(
                "no aggregate functions given for '{}'",
                column.column
            )));
        }
    }
    Ok(())
}
