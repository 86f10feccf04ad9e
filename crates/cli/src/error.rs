use engine_runtime::error::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read the input file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse the operations file as JSON: {0}")]
    OperationsParse(#[from] serde_json::Error),

    #[error("Failed to read the CSV file: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid schema declaration: {0}")]
    InvalidSchema(String),

    #[error("Column '{0}' is missing from the CSV header")]
    MissingColumn(String),

    #[error("Row {row}, column '{column}': '{cell}' is not a number")]
    BadNumber {
        row: u64,
        column: String,
        cell: String,
    },

    #[error("Invalid operations file: {0}")]
    InvalidOperations(String),

    #[error("Dataset '{0}' not found")]
    UnknownDataset(String),

    #[error("Task {0} not found")]
    UnknownTask(String),

    #[error("Invalid identifier '{0}'")]
    InvalidId(String),

    #[error("Invalid flag value: {0}")]
    InvalidFlag(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(serde_json::Error),
}
