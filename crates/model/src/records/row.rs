use crate::core::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub name: String,
    pub value: Value,
}

impl FieldValue {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A single dataset record. `id` is the zero-based position assigned at
/// ingestion and is stable across re-processing runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: u64,
    pub fields: Vec<FieldValue>,
}

impl Row {
    pub fn new(id: u64, fields: Vec<FieldValue>) -> Self {
        Row { id, fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| &f.value)
    }
}

/// Contiguous slice of a dataset, the unit of work handed to both
/// pipeline variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u32,
    pub rows: Vec<Row>,
}

impl Chunk {
    pub fn new(index: u32, rows: Vec<Row>) -> Self {
        Chunk { index, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
