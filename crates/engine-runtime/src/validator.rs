//! Equivalence checking between variant outputs.
//!
//! Completed, unvalidated tasks are grouped by `(run, iteration, kind)`
//! and compared against a reference: the baseline task, or the oldest
//! task when no baseline completed. Numeric results match within an
//! absolute tolerance; id and group comparisons ignore ordering.
//! Validation never leaves a compared task unvalidated: comparison
//! failures mark it invalid.

use std::collections::{BTreeMap, HashMap, HashSet};

use engine_core::store::{TaskFilter, TaskStore};
use model::core::identifiers::RunId;
use model::core::value::Value;
use model::execution::operation::{AggregateFn, OperationKind, Trigger};
use model::execution::output::{AggregateValue, ColumnAggregates, GroupEntry, TaskOutput};
use model::execution::task::{Task, TaskStatus};
use tracing::{debug, info};

use crate::Engine;
use crate::error::EngineError;

/// Two numeric results are equivalent when they differ by at most this
/// absolute amount.
pub const EPSILON: f64 = 0.002;

/// Validates every settled iteration with completed, unvalidated
/// tasks. Scheduled work is checked before user submissions.
pub(crate) async fn validate_runs(engine: &Engine) -> Result<(), EngineError> {
    for trigger in [Trigger::System, Trigger::User] {
        let filter = TaskFilter::all()
            .trigger(trigger)
            .status(TaskStatus::Completed)
            .validated(false);
        let tasks = engine.store.list_tasks(&filter).await?;
        if tasks.is_empty() {
            continue;
        }

        let mut groups: BTreeMap<(RunId, u32, OperationKind), Vec<Task>> = BTreeMap::new();
        for task in tasks {
            groups
                .entry((task.run_id, task.iteration, task.kind))
                .or_default()
                .push(task);
        }

        for ((run_id, iteration, kind), group) in groups {
            if !iteration_settled(engine, run_id, iteration, trigger).await? {
                debug!(%run_id, iteration, %trigger, "iteration still running, skipping validation");
                continue;
            }
            validate_group(engine, run_id, iteration, kind, group).await?;
        }
    }
    Ok(())
}

/// An iteration is settled once none of its tasks can still change.
async fn iteration_settled(
    engine: &Engine,
    run_id: RunId,
    iteration: u32,
    trigger: Trigger,
) -> Result<bool, EngineError> {
    let filter = TaskFilter::all()
        .run(run_id)
        .iteration(iteration)
        .trigger(trigger);
    let tasks = engine.store.list_tasks(&filter).await?;
    Ok(tasks.iter().all(|t| t.status.is_terminal()))
}

async fn validate_group(
    engine: &Engine,
    run_id: RunId,
    iteration: u32,
    kind: OperationKind,
    mut group: Vec<Task>,
) -> Result<(), EngineError> {
    // Baseline first, then by task id, so the reference is stable
    // across repeated validation passes.
    group.sort_by(|a, b| a.variant.cmp(&b.variant).then(a.id.cmp(&b.id)));
    let reference_output = group[0].output.clone();

    let mut valid_count = 0;
    for (position, task) in group.iter_mut().enumerate() {
        task.validated = true;
        task.valid = if position == 0 {
            reference_output.is_some()
        } else {
            match (&reference_output, &task.output) {
                (Some(reference), Some(output)) => outputs_equivalent(reference, output),
                _ => false,
            }
        };
        if task.valid {
            valid_count += 1;
        }
        task.touch();
        engine.store.update_task(task).await?;
    }
    info!(
        %run_id,
        iteration,
        %kind,
        tasks = group.len(),
        valid = valid_count,
        "outputs validated"
    );
    Ok(())
}

fn outputs_equivalent(reference: &TaskOutput, other: &TaskOutput) -> bool {
    match (reference, other) {
        (TaskOutput::FilterIds(a), TaskOutput::FilterIds(b)) => id_sets_equal(a, b),
        (TaskOutput::Groups(a), TaskOutput::Groups(b)) => groups_equivalent(a, b),
        (TaskOutput::Aggregates(a), TaskOutput::Aggregates(b)) => aggregates_equivalent(a, b),
        _ => false,
    }
}

fn id_sets_equal(a: &[u64], b: &[u64]) -> bool {
    a.len() == b.len()
        && a.iter().collect::<HashSet<_>>() == b.iter().collect::<HashSet<_>>()
}

fn groups_equivalent(a: &[GroupEntry], b: &[GroupEntry]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let by_key: HashMap<&Vec<Value>, &Vec<u64>> =
        b.iter().map(|g| (&g.key, &g.members)).collect();
    a.iter().all(|entry| {
        by_key
            .get(&entry.key)
            .is_some_and(|members| id_sets_equal(&entry.members, members))
    })
}

fn aggregates_equivalent(a: &[ColumnAggregates], b: &[ColumnAggregates]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|column| {
        b.iter()
            .find(|other| other.column == column.column)
            .is_some_and(|other| results_equivalent(&column.results, &other.results))
    })
}

fn results_equivalent(
    a: &[(AggregateFn, AggregateValue)],
    b: &[(AggregateFn, AggregateValue)],
) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(function, value)| {
        b.iter()
            .find(|(other_fn, _)| other_fn == function)
            .is_some_and(|(_, other)| values_equivalent(value, other))
    })
}

fn values_equivalent(a: &AggregateValue, b: &AggregateValue) -> bool {
    match (a, b) {
        (AggregateValue::NoValue, AggregateValue::NoValue) => true,
        (AggregateValue::Number(x), AggregateValue::Number(y)) => (x - y).abs() <= EPSILON,
        (AggregateValue::Single(x), AggregateValue::Single(y)) => single_equivalent(x, y),
        (AggregateValue::Many(x), AggregateValue::Many(y)) => multiset_equal(x, y),
        _ => false,
    }
}

/// Numeric singles get the tolerance, everything else compares exactly.
fn single_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => (x - y).abs() <= EPSILON,
                _ => false,
            }
        }
        _ => a == b,
    }
}

fn multiset_equal(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut counts: HashMap<&Value, i64> = HashMap::new();
    for value in a {
        *counts.entry(value).or_default() += 1;
    }
    for value in b {
        match counts.get_mut(value) {
            Some(n) => *n -= 1,
            None => return false,
        }
    }
    counts.values().all(|n| *n == 0)
}
