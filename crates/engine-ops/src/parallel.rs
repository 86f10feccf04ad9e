use crate::error::OpError;
use model::execution::operation::Variant;

/// How many worker threads a variant may use. The baseline is fixed to
/// one; the candidate takes every core not held in reserve, but always
/// at least one.
pub fn worker_count(variant: Variant, reserve_cpus: usize) -> usize {
    match variant {
        Variant::Baseline => 1,
        Variant::Candidate => {
            let total = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            total.saturating_sub(reserve_cpus).max(1)
        }
    }
}

/// Splits `items` into at most `workers` contiguous slices and maps each
/// slice on its own scoped thread. Outputs come back in slice order, so
/// merging them in sequence preserves the input row order.
pub fn map_slices<T, R, F>(items: &[T], workers: usize, f: F) -> Result<Vec<R>, OpError>
where
    T: Sync,
    R: Send,
    F: Fn(&[T]) -> R + Sync,
{
    if workers <= 1 || items.len() <= 1 {
        return Ok(vec![f(items)]);
    }
    let slice_len = items.len().div_ceil(workers);
    std::thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = items
            .chunks(slice_len)
            .map(|slice| scope.spawn(move || f(slice)))
            .collect();
        let mut outputs = Vec::with_capacity(handles.len());
        for handle in handles {
            outputs.push(handle.join().map_err(|_| OpError::WorkerPanic)?);
        }
        Ok(outputs)
    })
}
