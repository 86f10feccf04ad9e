//! Chunked execution of one run iteration.
//!
//! Both variants of the pipeline see the same row pages: the baseline
//! tasks run their operations single threaded, the candidate tasks fan
//! out over the remaining cores. Every (task, chunk) execution is
//! monitored and persisted as an immutable batch result; the final
//! per-task summaries are produced by the reconciler afterwards.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use engine_core::monitor::{MonitorConfig, MonitorSession, ResourceMonitor};
use engine_core::store::{DatasetStore, ResultStore, TaskFilter, TaskStore};
use engine_ops::{OpError, OperationOutcome, run_operation};
use model::core::identifiers::{DatasetId, RunId, TaskId};
use model::execution::operation::{OperationKind, Trigger, Variant};
use model::execution::output::{BatchContent, BatchResult};
use model::execution::task::{ResourceSample, Task, TaskStatus};
use model::records::row::{Chunk, Row};
use tracing::{debug, info, warn};

use crate::Engine;
use crate::error::EngineError;
use crate::reconciler;

/// Splits `total_rows` into `(offset, len)` pages of at most
/// `chunk_size` rows each.
pub(crate) fn chunk_bounds(total_rows: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    if total_rows == 0 {
        return Vec::new();
    }
    if chunk_size == 0 {
        return vec![(0, total_rows)];
    }
    let mut bounds = Vec::with_capacity(total_rows.div_ceil(chunk_size) as usize);
    let mut offset = 0;
    while offset < total_rows {
        let len = chunk_size.min(total_rows - offset);
        bounds.push((offset, len));
        offset += len;
    }
    bounds
}

/// The tasks of one variant within a single iteration, in pipeline
/// order. `failed` remembers tasks that already failed so later chunks
/// skip them.
struct VariantPlan {
    filter: Option<Task>,
    group: Option<Task>,
    aggregate: Option<Task>,
    failed: HashSet<TaskId>,
}

impl VariantPlan {
    fn from_tasks(variant: Variant, tasks: &[Task]) -> Self {
        let pick = |kind: OperationKind| {
            tasks
                .iter()
                .find(|t| t.variant == variant && t.kind == kind)
                .cloned()
        };
        VariantPlan {
            filter: pick(OperationKind::Filter),
            group: pick(OperationKind::Group),
            aggregate: pick(OperationKind::Aggregate),
            failed: HashSet::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.filter.is_none() && self.group.is_none() && self.aggregate.is_none()
    }
}

/// Executes every pending task of `(run, iteration, trigger)` over the
/// dataset in chunks, then reconciles the iteration.
pub(crate) async fn run_batches(
    engine: &Engine,
    run_id: RunId,
    dataset_id: DatasetId,
    actions: Vec<OperationKind>,
    iteration: u32,
    trigger: Trigger,
) -> Result<(), EngineError> {
    let Some(dataset) = engine.store.get_dataset(dataset_id).await? else {
        // The dataset vanished between enqueue and claim. Fail the
        // tasks so the iteration still terminates.
        fail_pending(engine, run_id, iteration, trigger, "dataset no longer exists").await?;
        return Err(EngineError::DatasetNotFound(dataset_id));
    };

    let pending = TaskFilter::all()
        .run(run_id)
        .iteration(iteration)
        .trigger(trigger)
        .status(TaskStatus::Pending);
    let tasks = engine.store.list_tasks(&pending).await?;
    if tasks.is_empty() {
        warn!(%run_id, iteration, %trigger, "no pending tasks for iteration");
        return Ok(());
    }

    // Tasks planned against an older ingestion fail instead of running
    // over rows they were never meant to see.
    let mut live = Vec::with_capacity(tasks.len());
    for mut task in tasks {
        if task.dataset_version != dataset.version {
            task.status = TaskStatus::Failed;
            task.error = Some(format!(
                "dataset version {} superseded by {}",
                task.dataset_version, dataset.version
            ));
            task.touch();
            engine.store.update_task(&task).await?;
        } else {
            task.status = TaskStatus::InProgress;
            task.touch();
            engine.store.update_task(&task).await?;
            live.push(task);
        }
    }

    let mut baseline = VariantPlan::from_tasks(Variant::Baseline, &live);
    let mut candidate = VariantPlan::from_tasks(Variant::Candidate, &live);

    let bounds = chunk_bounds(dataset.size, engine.settings.chunk_size);
    info!(
        %run_id,
        iteration,
        %trigger,
        ?actions,
        rows = dataset.size,
        chunks = bounds.len(),
        "iteration started"
    );

    for (index, (offset, len)) in bounds.iter().enumerate() {
        let rows = engine.store.page_rows(dataset_id, *offset, *len).await?;
        let chunk = Arc::new(Chunk::new(index as u32, rows));
        let (first, second) = tokio::join!(
            process_chunk(engine, &mut baseline, Arc::clone(&chunk)),
            process_chunk(engine, &mut candidate, chunk),
        );
        first?;
        second?;
    }

    reconciler::reconcile_iteration(engine, run_id, iteration, trigger).await?;
    info!(%run_id, iteration, %trigger, "iteration finished");
    Ok(())
}

/// Runs one variant's pipeline over a single chunk. The filter feeds
/// group and aggregate; the latter two run concurrently.
async fn process_chunk(
    engine: &Engine,
    plan: &mut VariantPlan,
    chunk: Arc<Chunk>,
) -> Result<(), EngineError> {
    if plan.is_empty() {
        return Ok(());
    }

    let source = match plan.filter.clone() {
        // A failed filter already took its downstream tasks with it.
        Some(task) if plan.failed.contains(&task.id) => return Ok(()),
        Some(task) => {
            match run_task_chunk(engine, &task, Arc::clone(&chunk)).await? {
                ChunkOutcome::Survivors(Some(survivors)) => {
                    Arc::new(Chunk::new(chunk.index, survivors))
                }
                ChunkOutcome::Survivors(None) => Arc::new(Chunk::new(chunk.index, Vec::new())),
                ChunkOutcome::Failed(message) => {
                    warn!(task_id = %task.id, chunk = chunk.index, %message, "filter failed");
                    fail_task(engine, &mut plan.failed, task.id, &message).await?;
                    let cause = format!("filter failed: {message}");
                    let downstream: Vec<TaskId> = plan
                        .group
                        .iter()
                        .chain(plan.aggregate.iter())
                        .map(|t| t.id)
                        .collect();
                    for id in downstream {
                        fail_task(engine, &mut plan.failed, id, &cause).await?;
                    }
                    return Ok(());
                }
            }
        }
        None => chunk,
    };

    let group = plan.group.clone().filter(|t| !plan.failed.contains(&t.id));
    let aggregate = plan
        .aggregate
        .clone()
        .filter(|t| !plan.failed.contains(&t.id));

    let (group_outcome, aggregate_outcome) = tokio::join!(
        run_optional(engine, group.as_ref(), Arc::clone(&source)),
        run_optional(engine, aggregate.as_ref(), source),
    );
    record_failure(engine, &mut plan.failed, group, group_outcome?).await?;
    record_failure(engine, &mut plan.failed, aggregate, aggregate_outcome?).await?;
    Ok(())
}

/// What happened to one (task, chunk) execution.
enum ChunkOutcome {
    /// The operation succeeded and its batch result is persisted.
    /// Filter tasks additionally carry their surviving rows.
    Survivors(Option<Vec<Row>>),
    /// The operation failed; nothing was persisted for this chunk.
    Failed(String),
}

async fn run_optional(
    engine: &Engine,
    task: Option<&Task>,
    chunk: Arc<Chunk>,
) -> Result<Option<ChunkOutcome>, EngineError> {
    match task {
        Some(task) => Ok(Some(run_task_chunk(engine, task, chunk).await?)),
        None => Ok(None),
    }
}

async fn record_failure(
    engine: &Engine,
    failed: &mut HashSet<TaskId>,
    task: Option<Task>,
    outcome: Option<ChunkOutcome>,
) -> Result<(), EngineError> {
    if let (Some(task), Some(ChunkOutcome::Failed(message))) = (task, outcome) {
        warn!(task_id = %task.id, kind = %task.kind, %message, "operation failed");
        fail_task(engine, failed, task.id, &message).await?;
    }
    Ok(())
}

/// Executes one operation on one chunk under resource monitoring and
/// persists the batch result.
async fn run_task_chunk(
    engine: &Engine,
    task: &Task,
    chunk: Arc<Chunk>,
) -> Result<ChunkOutcome, EngineError> {
    let chunk_index = chunk.index;
    let input_rows = chunk.len() as u64;
    let spec = task.spec.clone();
    let variant = task.variant;
    let reserve = engine.settings.candidate_reserve_cpus;

    let monitor = ResourceMonitor::start(MonitorConfig {
        interval: engine.settings.monitor_interval,
        strategy: engine.settings.cpu_strategy.clone(),
    });
    let joined =
        tokio::task::spawn_blocking(move || run_operation(&spec, &chunk.rows, variant, reserve))
            .await;
    let samples = stop_monitor(monitor).await;

    let outcome = match joined {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => return Ok(ChunkOutcome::Failed(err.to_string())),
        Err(err) => {
            warn!(task_id = %task.id, error = %err, "operation worker aborted");
            return Ok(ChunkOutcome::Failed(OpError::WorkerPanic.to_string()));
        }
    };

    let (content, output_rows, survivors) = split_outcome(outcome);
    let result = BatchResult {
        task_id: task.id,
        run_id: task.run_id,
        chunk_index,
        input_rows,
        output_rows,
        samples,
        content,
        created_at: Utc::now(),
    };
    engine.store.append_result(&result).await?;
    debug!(
        task_id = %task.id,
        kind = %task.kind,
        variant = %task.variant,
        chunk = chunk_index,
        input_rows,
        "batch recorded"
    );
    Ok(ChunkOutcome::Survivors(survivors))
}

fn split_outcome(outcome: OperationOutcome) -> (BatchContent, Option<u64>, Option<Vec<Row>>) {
    match outcome {
        OperationOutcome::Filtered(rows) => {
            let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
            let survivors = ids.len() as u64;
            (BatchContent::FilterIds(ids), Some(survivors), Some(rows))
        }
        OperationOutcome::Grouped(groups) => {
            let members: u64 = groups.iter().map(|g| g.members.len() as u64).sum();
            (BatchContent::Groups(groups), Some(members), None)
        }
        OperationOutcome::Aggregated(partials) => (BatchContent::Aggregate(partials), None, None),
    }
}

async fn stop_monitor(session: MonitorSession) -> Vec<ResourceSample> {
    match tokio::task::spawn_blocking(move || session.stop()).await {
        Ok(samples) => samples,
        Err(err) => {
            warn!(error = %err, "resource monitor shutdown failed");
            Vec::new()
        }
    }
}

/// Marks a task failed with the first error it hit. Later errors for
/// the same task are ignored.
async fn fail_task(
    engine: &Engine,
    failed: &mut HashSet<TaskId>,
    task_id: TaskId,
    message: &str,
) -> Result<(), EngineError> {
    if !failed.insert(task_id) {
        return Ok(());
    }
    if let Some(mut task) = engine.store.get_task(task_id).await? {
        task.status = TaskStatus::Failed;
        task.error = Some(message.to_string());
        task.touch();
        engine.store.update_task(&task).await?;
    }
    Ok(())
}

async fn fail_pending(
    engine: &Engine,
    run_id: RunId,
    iteration: u32,
    trigger: Trigger,
    message: &str,
) -> Result<(), EngineError> {
    let pending = TaskFilter::all()
        .run(run_id)
        .iteration(iteration)
        .trigger(trigger)
        .status(TaskStatus::Pending);
    for mut task in engine.store.list_tasks(&pending).await? {
        task.status = TaskStatus::Failed;
        task.error = Some(message.to_string());
        task.touch();
        engine.store.update_task(&task).await?;
    }
    Ok(())
}
