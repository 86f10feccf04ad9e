use crate::{error::OpError, parallel};
use model::{
    execution::{operation::AggregateColumn, output::AggregatePartial},
    records::row::Row,
};

/// Builds one partial per requested column. Raw values are retained only
/// for columns whose function list needs them (median, unique, mode), so
/// a plain sum/mean column costs constant space per chunk.
pub fn aggregate_rows(
    rows: &[Row],
    columns: &[AggregateColumn],
    workers: usize,
) -> Result<Vec<AggregatePartial>, OpError> {
    if columns.is_empty() {
        return Err(OpError::NoColumns);
    }
    let retain: Vec<bool> = columns
        .iter()
        .map(|c| c.functions.iter().any(|f| f.needs_raw_values()))
        .collect();

    let slices = parallel::map_slices(rows, workers, |slice| {
        columns
            .iter()
            .zip(&retain)
            .map(|(col, keep)| {
                let mut partial = AggregatePartial::new(&col.column);
                for row in slice {
                    if let Some(value) = row.get(&col.column) {
                        partial.observe(value, *keep);
                    }
                }
                partial
            })
            .collect::<Vec<AggregatePartial>>()
    })?;

    let mut merged: Vec<AggregatePartial> = columns
        .iter()
        .map(|c| AggregatePartial::new(&c.column))
        .collect();
    for slice_partials in slices {
        for (into, partial) in merged.iter_mut().zip(slice_partials) {
            into.merge(partial);
        }
    }
    Ok(merged)
}
