use model::core::identifiers::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Db(#[from] sled::Error),

    #[error("serialization failure: {0}")]
    Codec(#[from] bincode::Error),

    #[error("batch result for task {task} chunk {chunk} already written")]
    DuplicateResult { task: TaskId, chunk: u32 },

    #[error("dataset row counter overflowed")]
    RowCounterOverflow,
}
