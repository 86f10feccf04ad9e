//! Folds per-chunk batch results into one summary per task.
//!
//! Reconciliation is a pure function of the persisted batch results,
//! so running it again over the same results yields the same summary.

use std::collections::HashMap;

use engine_core::store::{DatasetStore, ResultStore, TaskFilter, TaskStore};
use model::core::identifiers::RunId;
use model::core::value::Value;
use model::execution::operation::{OperationKind, OperationSpec, Trigger, Variant};
use model::execution::output::{
    AggregatePartial, BatchContent, BatchResult, ColumnAggregates, GroupEntry, TaskOutput,
};
use model::execution::task::{Task, TaskMetrics, TaskStatus};
use tracing::{debug, warn};

use crate::Engine;
use crate::error::EngineError;

/// Summarizes every runnable task of `(run, iteration, trigger)`.
///
/// The filter task of each variant is reconciled first: its total
/// output is the input size of the downstream tasks. Tasks that failed
/// during chunking keep their error untouched.
pub(crate) async fn reconcile_iteration(
    engine: &Engine,
    run_id: RunId,
    iteration: u32,
    trigger: Trigger,
) -> Result<(), EngineError> {
    let filter = TaskFilter::all()
        .run(run_id)
        .iteration(iteration)
        .trigger(trigger);
    let tasks = engine.store.list_tasks(&filter).await?;
    if tasks.is_empty() {
        return Ok(());
    }

    let dataset_size = match engine.store.get_dataset(tasks[0].dataset_id).await? {
        Some(dataset) => dataset.size,
        None => 0,
    };

    for variant in [Variant::Baseline, Variant::Candidate] {
        let mut downstream_input = dataset_size;
        if let Some(task) = tasks
            .iter()
            .find(|t| t.variant == variant && t.kind == OperationKind::Filter)
        {
            let reconciled = reconcile_task(engine, task, dataset_size).await?;
            if reconciled.status == TaskStatus::Completed {
                downstream_input = reconciled.metrics.output_rows.unwrap_or(0);
            }
        }
        for task in tasks
            .iter()
            .filter(|t| t.variant == variant && t.kind != OperationKind::Filter)
        {
            reconcile_task(engine, task, downstream_input).await?;
        }
    }
    Ok(())
}

/// Builds the whole-dataset summary of one task from its batch results
/// and persists it. Returns the task as stored afterwards.
pub(crate) async fn reconcile_task(
    engine: &Engine,
    task: &Task,
    input_rows: u64,
) -> Result<Task, EngineError> {
    // Failed tasks keep their error; pending ones were never run.
    if matches!(task.status, TaskStatus::Failed | TaskStatus::Pending) {
        return Ok(task.clone());
    }

    let mut task = task.clone();
    match summarize(engine, &task, input_rows).await {
        Ok((metrics, output)) => {
            task.metrics = metrics;
            task.output = Some(output);
            task.status = TaskStatus::Completed;
            task.error = None;
            debug!(
                task_id = %task.id,
                kind = %task.kind,
                variant = %task.variant,
                input_rows,
                output_rows = ?task.metrics.output_rows,
                duration_ms = task.metrics.duration_ms,
                "task reconciled"
            );
        }
        Err(err) => {
            warn!(task_id = %task.id, error = %err, "reconciliation failed");
            task.status = TaskStatus::Failed;
            task.error = Some(err.to_string());
        }
    }
    task.touch();
    engine.store.update_task(&task).await?;
    Ok(task)
}

async fn summarize(
    engine: &Engine,
    task: &Task,
    input_rows: u64,
) -> Result<(TaskMetrics, TaskOutput), EngineError> {
    let results = fetch_results(engine, task).await?;

    let mut samples = Vec::new();
    let mut produced: Option<u64> = None;
    let mut merged: Option<MergedContent> = None;
    for result in results {
        samples.extend(result.samples);
        if let Some(n) = result.output_rows {
            produced = Some(produced.unwrap_or(0) + n);
        }
        merge_content(task, &mut merged, result.content)?;
    }

    samples.sort_by_key(|s| s.at);
    let started_at = samples.first().map(|s| s.at);
    let ended_at = samples.last().map(|s| s.at);
    let duration_ms = match (started_at, ended_at) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
        _ => 0,
    };
    let output_rows = match task.kind {
        OperationKind::Aggregate => None,
        _ => Some(produced.unwrap_or(0)),
    };

    let output = match merged {
        Some(MergedContent::FilterIds(ids)) => TaskOutput::FilterIds(ids),
        Some(MergedContent::Groups { entries, .. }) => TaskOutput::Groups(entries),
        Some(MergedContent::Aggregate(partials)) => finalize_aggregates(task, partials)?,
        // An empty dataset produces zero batches but still an output.
        None => empty_output(task)?,
    };

    let metrics = TaskMetrics {
        input_rows,
        output_rows,
        started_at,
        ended_at,
        duration_ms,
        samples,
    };
    Ok((metrics, output))
}

async fn fetch_results(engine: &Engine, task: &Task) -> Result<Vec<BatchResult>, EngineError> {
    let page_size = engine.settings.result_page_size.max(1);
    let mut results = Vec::new();
    let mut skip = 0;
    loop {
        let page = engine.store.results_for_task(task.id, skip, page_size).await?;
        let fetched = page.len() as u64;
        results.extend(page);
        if fetched < page_size {
            return Ok(results);
        }
        skip += fetched;
    }
}

/// Accumulator over batch contents in chunk order.
enum MergedContent {
    FilterIds(Vec<u64>),
    Groups {
        entries: Vec<GroupEntry>,
        index: HashMap<Vec<Value>, usize>,
    },
    Aggregate(Vec<AggregatePartial>),
}

fn merge_content(
    task: &Task,
    merged: &mut Option<MergedContent>,
    content: BatchContent,
) -> Result<(), EngineError> {
    let Some(accumulator) = merged else {
        *merged = Some(match content {
            // Chunks partition the dataset in ascending row order, so
            // concatenated id lists stay sorted.
            BatchContent::FilterIds(ids) => MergedContent::FilterIds(ids),
            BatchContent::Groups(entries) => {
                let index = entries
                    .iter()
                    .enumerate()
                    .map(|(i, g)| (g.key.clone(), i))
                    .collect();
                MergedContent::Groups { entries, index }
            }
            BatchContent::Aggregate(partials) => MergedContent::Aggregate(partials),
        });
        return Ok(());
    };

    match (accumulator, content) {
        (MergedContent::FilterIds(ids), BatchContent::FilterIds(more)) => {
            ids.extend(more);
        }
        (MergedContent::Groups { entries, index }, BatchContent::Groups(more)) => {
            for entry in more {
                match index.get(&entry.key) {
                    Some(&at) => entries[at].members.extend(entry.members),
                    None => {
                        index.insert(entry.key.clone(), entries.len());
                        entries.push(entry);
                    }
                }
            }
        }
        (MergedContent::Aggregate(partials), BatchContent::Aggregate(more)) => {
            for partial in more {
                match partials.iter_mut().find(|p| p.column == partial.column) {
                    Some(existing) => existing.merge(partial),
                    None => partials.push(partial),
                }
            }
        }
        _ => {
            return Err(EngineError::InconsistentResults {
                task: task.id,
                detail: "mixed batch content kinds".into(),
            });
        }
    }
    Ok(())
}

fn finalize_aggregates(
    task: &Task,
    partials: Vec<AggregatePartial>,
) -> Result<TaskOutput, EngineError> {
    let OperationSpec::Aggregate { columns } = &task.spec else {
        return Err(EngineError::InconsistentResults {
            task: task.id,
            detail: "aggregate batches for a non-aggregate task".into(),
        });
    };
    let output = columns
        .iter()
        .map(|requested| {
            let results = match partials.iter().find(|p| p.column == requested.column) {
                Some(partial) => partial.finalize(&requested.functions),
                None => {
                    AggregatePartial::new(requested.column.clone()).finalize(&requested.functions)
                }
            };
            ColumnAggregates {
                column: requested.column.clone(),
                results,
            }
        })
        .collect();
    Ok(TaskOutput::Aggregates(output))
}

fn empty_output(task: &Task) -> Result<TaskOutput, EngineError> {
    Ok(match task.kind {
        OperationKind::Filter => TaskOutput::FilterIds(Vec::new()),
        OperationKind::Group => TaskOutput::Groups(Vec::new()),
        OperationKind::Aggregate => finalize_aggregates(task, Vec::new())?,
    })
}
