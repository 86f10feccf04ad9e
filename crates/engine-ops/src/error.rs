use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpError {
    #[error("filter needs at least one predicate")]
    NoPredicates,

    #[error("group-by needs at least one key column")]
    NoKeys,

    #[error("aggregation needs at least one column")]
    NoColumns,

    #[error("worker thread panicked")]
    WorkerPanic,
}
