use crate::error::CliError;
use model::core::value::Value;
use model::execution::operation::{
    AggregateColumn, AggregateFn, FilterOp, OperationSpec, Predicate,
};
use serde::Deserialize;
use std::str::FromStr;

/// On-disk shape of a run submission. Operator and function names use
/// the engine's tokens (`>=`, `mean`, ...); predicate values are plain
/// JSON scalars.
#[derive(Debug, Deserialize)]
struct OperationsFile {
    operations: Vec<OperationEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OperationEntry {
    Filter { predicates: Vec<PredicateEntry> },
    Group { keys: Vec<String> },
    Aggregate { columns: Vec<AggregateEntry> },
}

#[derive(Debug, Deserialize)]
struct PredicateEntry {
    column: String,
    op: String,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AggregateEntry {
    column: String,
    functions: Vec<String>,
}

pub fn parse_operations(source: &str) -> Result<Vec<OperationSpec>, CliError> {
    let file: OperationsFile = serde_json::from_str(source)?;
    file.operations.into_iter().map(convert_entry).collect()
}

fn convert_entry(entry: OperationEntry) -> Result<OperationSpec, CliError> {
    match entry {
        OperationEntry::Filter { predicates } => {
            let predicates = predicates
                .into_iter()
                .map(|p| {
                    let op = FilterOp::from_str(&p.op)
                        .map_err(|e| CliError::InvalidOperations(e.to_string()))?;
                    Ok(Predicate::new(p.column, op, scalar_to_value(p.value)?))
                })
                .collect::<Result<Vec<_>, CliError>>()?;
            Ok(OperationSpec::Filter { predicates })
        }
        OperationEntry::Group { keys } => Ok(OperationSpec::Group { keys }),
        OperationEntry::Aggregate { columns } => {
            let columns = columns
                .into_iter()
                .map(|c| {
                    let functions = c
                        .functions
                        .iter()
                        .map(|f| {
                            AggregateFn::from_str(f)
                                .map_err(|e| CliError::InvalidOperations(e.to_string()))
                        })
                        .collect::<Result<Vec<_>, CliError>>()?;
                    Ok(AggregateColumn::new(c.column, functions))
                })
                .collect::<Result<Vec<_>, CliError>>()?;
            Ok(OperationSpec::Aggregate { columns })
        }
    }
}

/// i64-representable numbers stay integers; everything else numeric
/// becomes a float.
fn scalar_to_value(value: serde_json::Value) -> Result<Value, CliError> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(CliError::InvalidOperations(format!(
                    "number {n} is out of range"
                )))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(s)),
        other => Err(CliError::InvalidOperations(format!(
            "predicate values must be scalars, got {other}"
        ))),
    }
}
