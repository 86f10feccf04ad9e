pub mod aggregate;
pub mod error;
pub mod filter;
pub mod group;
pub mod parallel;

use model::{
    execution::{
        operation::{OperationSpec, Variant},
        output::{AggregatePartial, GroupEntry},
    },
    records::row::Row,
};
use tracing::debug;

pub use error::OpError;

/// Output of one operation over one set of rows. Filtering yields the
/// surviving rows so downstream stages can consume them directly;
/// aggregation yields mergeable partials rather than finalized numbers.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Filtered(Vec<Row>),
    Grouped(Vec<GroupEntry>),
    Aggregated(Vec<AggregatePartial>),
}

/// Runs one operation on the given rows with the parallelism the variant
/// allows. Pure: no I/O, deterministic for a fixed input.
pub fn run_operation(
    spec: &OperationSpec,
    rows: &[Row],
    variant: Variant,
    reserve_cpus: usize,
) -> Result<OperationOutcome, OpError> {
    let workers = parallel::worker_count(variant, reserve_cpus);
    debug!(
        kind = %spec.kind(),
        %variant,
        workers,
        rows = rows.len(),
        "running operation"
    );
    match spec {
        OperationSpec::Filter { predicates } => {
            filter::filter_rows(rows, predicates, workers).map(OperationOutcome::Filtered)
        }
        OperationSpec::Group { keys } => {
            group::group_rows(rows, keys, workers).map(OperationOutcome::Grouped)
        }
        OperationSpec::Aggregate { columns } => {
            aggregate::aggregate_rows(rows, columns, workers).map(OperationOutcome::Aggregated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{
        core::value::Value,
        execution::operation::{FilterOp, Predicate},
        records::row::FieldValue,
    };

    #[test]
    fn outcome_variant_tracks_spec_kind() {
        let rows = vec![Row::new(
            1,
            vec![FieldValue::new("age", Value::Int(30))],
        )];
        let spec = OperationSpec::Filter {
            predicates: vec![Predicate::new("age", FilterOp::Ge, Value::Int(18))],
        };
        let out = run_operation(&spec, &rows, Variant::Candidate, 3).unwrap();
        match out {
            OperationOutcome::Filtered(kept) => assert_eq!(kept.len(), 1),
            other => panic!("expected filtered rows, got {other:?}"),
        }
    }
}
