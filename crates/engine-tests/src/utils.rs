#![allow(dead_code)]

use engine_core::store::{TaskFilter, TaskStore};
use engine_runtime::Engine;
use model::core::identifiers::RunId;
use model::core::value::Value;
use model::execution::operation::{
    AggregateColumn, AggregateFn, FilterOp, OperationKind, OperationSpec, Predicate, Variant,
};
use model::execution::output::{AggregateValue, TaskOutput};
use model::execution::task::Task;

pub fn filter(column: &str, op: FilterOp, value: Value) -> OperationSpec {
    OperationSpec::Filter {
        predicates: vec![Predicate::new(column, op, value)],
    }
}

pub fn group_by(keys: &[&str]) -> OperationSpec {
    OperationSpec::Group {
        keys: keys.iter().map(|k| k.to_string()).collect(),
    }
}

pub fn aggregate(column: &str, functions: &[AggregateFn]) -> OperationSpec {
    OperationSpec::Aggregate {
        columns: vec![AggregateColumn::new(column, functions.to_vec())],
    }
}

pub async fn tasks_of(engine: &Engine, run_id: RunId) -> Vec<Task> {
    engine
        .store
        .list_tasks(&TaskFilter::all().run(run_id))
        .await
        .expect("list tasks")
}

/// The unique task of a run matching kind, variant and iteration.
pub async fn task_of(
    engine: &Engine,
    run_id: RunId,
    iteration: u32,
    kind: OperationKind,
    variant: Variant,
) -> Task {
    let tasks = engine
        .store
        .list_tasks(&TaskFilter::all().run(run_id).iteration(iteration))
        .await
        .expect("list tasks");
    tasks
        .into_iter()
        .find(|t| t.kind == kind && t.variant == variant)
        .unwrap_or_else(|| panic!("no {kind} {variant} task in iteration {iteration}"))
}

pub fn filter_ids(task: &Task) -> Vec<u64> {
    match &task.output {
        Some(TaskOutput::FilterIds(ids)) => ids.clone(),
        other => panic!("expected filter output, got {other:?}"),
    }
}

pub fn aggregate_result(task: &Task, column: &str, function: AggregateFn) -> AggregateValue {
    let Some(TaskOutput::Aggregates(columns)) = &task.output else {
        panic!("expected aggregate output, got {:?}", task.output);
    };
    let results = &columns
        .iter()
        .find(|c| c.column == column)
        .unwrap_or_else(|| panic!("no aggregates for column {column}"))
        .results;
    results
        .iter()
        .find(|(f, _)| *f == function)
        .unwrap_or_else(|| panic!("no {function} result for {column}"))
        .1
        .clone()
}

/// Unwraps a numeric aggregate and checks it against the expected
/// value with a small slack for summation-order differences.
pub fn assert_number(value: &AggregateValue, expected: f64) {
    match value {
        AggregateValue::Number(n) => {
            assert!(
                (n - expected).abs() < 1e-9,
                "expected {expected}, got {n}"
            );
        }
        other => panic!("expected a number, got {other:?}"),
    }
}
