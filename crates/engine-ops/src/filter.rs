use crate::{error::OpError, parallel};
use model::{
    core::value::Value,
    execution::operation::{FilterOp, Predicate},
    records::row::Row,
};
use std::cmp::Ordering;

/// Keeps the rows satisfying every predicate, preserving input order.
/// Survivors are cloned so downstream stages can run on them directly.
pub fn filter_rows(
    rows: &[Row],
    predicates: &[Predicate],
    workers: usize,
) -> Result<Vec<Row>, OpError> {
    if predicates.is_empty() {
        return Err(OpError::NoPredicates);
    }
    let kept = parallel::map_slices(rows, workers, |slice| {
        slice
            .iter()
            .filter(|row| row_satisfies(row, predicates))
            .cloned()
            .collect::<Vec<Row>>()
    })?;
    Ok(kept.into_iter().flatten().collect())
}

pub fn row_satisfies(row: &Row, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| matches(row.get(&p.column), p))
}

/// A missing column, a null cell or an incomparable pair never satisfies
/// a predicate; predicates do not raise.
fn matches(cell: Option<&Value>, predicate: &Predicate) -> bool {
    let Some(value) = cell else {
        return false;
    };
    if value.is_null() {
        return false;
    }
    match predicate.op {
        FilterOp::Eq => value.equal(&predicate.value),
        FilterOp::Ne => value
            .compare(&predicate.value)
            .is_some_and(|ord| ord != Ordering::Equal),
        FilterOp::Gt => value
            .compare(&predicate.value)
            .is_some_and(|ord| ord == Ordering::Greater),
        FilterOp::Lt => value
            .compare(&predicate.value)
            .is_some_and(|ord| ord == Ordering::Less),
        FilterOp::Ge => value
            .compare(&predicate.value)
            .is_some_and(|ord| ord != Ordering::Less),
        FilterOp::Le => value
            .compare(&predicate.value)
            .is_some_and(|ord| ord != Ordering::Greater),
        FilterOp::Contains => {
            let (Some(hay), Some(needle)) = (value.as_string(), predicate.value.as_string()) else {
                return false;
            };
            hay.to_lowercase().contains(&needle.to_lowercase())
        }
    }
}
