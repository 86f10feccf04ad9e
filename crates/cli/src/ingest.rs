use crate::error::CliError;
use model::core::column::{ColumnDef, ColumnType, Schema};
use model::core::value::Value;
use model::records::row::FieldValue;
use std::path::Path;
use std::str::FromStr;

/// Parses the `--schema` flag: comma-separated `name:type` pairs where
/// the type is `number` or `string`.
pub fn parse_schema(flag: &str) -> Result<Schema, CliError> {
    let mut columns = Vec::new();
    for part in flag.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((name, column_type)) = part.split_once(':') else {
            return Err(CliError::InvalidSchema(format!(
                "expected name:type, got '{part}'"
            )));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(CliError::InvalidSchema(format!(
                "empty column name in '{part}'"
            )));
        }
        let column_type = ColumnType::from_str(column_type.trim())
            .map_err(|e| CliError::InvalidSchema(e.to_string()))?;
        columns.push(ColumnDef::new(name, column_type));
    }
    if columns.is_empty() {
        return Err(CliError::InvalidSchema("no columns declared".into()));
    }
    Ok(Schema::new(columns))
}

/// Reads the CSV file, keeping only the declared columns. Header
/// matching is case-insensitive; empty cells load as nulls.
pub fn read_rows(path: &Path, schema: &Schema) -> Result<Vec<Vec<FieldValue>>, CliError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut ordinals = Vec::with_capacity(schema.columns.len());
    for column in &schema.columns {
        let ordinal = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(&column.name))
            .ok_or_else(|| CliError::MissingColumn(column.name.clone()))?;
        ordinals.push(ordinal);
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let mut fields = Vec::with_capacity(schema.columns.len());
        for (column, ordinal) in schema.columns.iter().zip(&ordinals) {
            let cell = record.get(*ordinal).unwrap_or("").trim();
            let value = parse_cell(cell, column.column_type).map_err(|cell| {
                CliError::BadNumber {
                    // 1-based, counting data rows below the header.
                    row: index as u64 + 1,
                    column: column.name.clone(),
                    cell,
                }
            })?;
            fields.push(FieldValue::new(&column.name, value));
        }
        rows.push(fields);
    }
    Ok(rows)
}

fn parse_cell(cell: &str, column_type: ColumnType) -> Result<Value, String> {
    if cell.is_empty() {
        return Ok(Value::Null);
    }
    match column_type {
        ColumnType::String => Ok(Value::String(cell.to_string())),
        ColumnType::Number => {
            if let Ok(i) = cell.parse::<i64>() {
                Ok(Value::Int(i))
            } else if let Ok(f) = cell.parse::<f64>() {
                Ok(Value::Float(f))
            } else {
                Err(cell.to_string())
            }
        }
    }
}
