use crate::{
    core::{
        identifiers::{RunId, TaskId},
        value::Value,
    },
    execution::{operation::AggregateFn, task::ResourceSample},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One group produced by a group-by: the key tuple (key-column values in
/// declared order) and the ids of its member rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub key: Vec<Value>,
    pub members: Vec<u64>,
}

impl GroupEntry {
    pub fn new(key: Vec<Value>, members: Vec<u64>) -> Self {
        Self { key, members }
    }
}

/// Result of one aggregation function. `NoValue` is the explicit marker
/// for an empty input set, distinct from a numeric zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateValue {
    Number(f64),
    Single(Value),
    Many(Vec<Value>),
    NoValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAggregates {
    pub column: String,
    pub results: Vec<(AggregateFn, AggregateValue)>,
}

/// Sufficient statistics for one column over some subset of rows.
/// Partials from worker slices or chunks merge into the same statistics
/// the whole input would have produced, so aggregates can be finalized
/// once at the end.
///
/// `values` keeps the raw non-null column values and is populated only
/// when the column requests a function that cannot be derived from the
/// running statistics (median, unique, mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatePartial {
    pub column: String,
    /// Non-null values seen.
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub first: Option<Value>,
    pub last: Option<Value>,
    pub values: Vec<Value>,
}

impl AggregatePartial {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: None,
            max: None,
            first: None,
            last: None,
            values: Vec::new(),
        }
    }

    /// Feeds one cell into the statistics. Nulls (and NaN) are skipped
    /// entirely; values that do not coerce to a number only count.
    pub fn observe(&mut self, value: &Value, retain_raw: bool) {
        if value.is_null() {
            return;
        }
        self.count += 1;
        if self.first.is_none() {
            self.first = Some(value.clone());
        }
        self.last = Some(value.clone());
        if let Some(n) = value.as_f64() {
            self.sum += n;
            self.sum_sq += n * n;
            self.min = Some(self.min.map_or(n, |m| m.min(n)));
            self.max = Some(self.max.map_or(n, |m| m.max(n)));
        }
        if retain_raw {
            self.values.push(value.clone());
        }
    }

    /// Folds another partial into this one. `other` must cover rows that
    /// come after this partial's rows for first/last and the raw value
    /// order to stay correct.
    pub fn merge(&mut self, other: AggregatePartial) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if self.first.is_none() {
            self.first = other.first;
        }
        if other.last.is_some() {
            self.last = other.last;
        }
        self.values.extend(other.values);
    }

    /// Computes the requested functions from the accumulated statistics.
    pub fn finalize(&self, functions: &[AggregateFn]) -> Vec<(AggregateFn, AggregateValue)> {
        functions.iter().map(|f| (*f, self.compute(*f))).collect()
    }

    fn compute(&self, function: AggregateFn) -> AggregateValue {
        use AggregateValue::*;
        match function {
            AggregateFn::Count => Number(self.count as f64),
            AggregateFn::Sum => Number(self.sum),
            AggregateFn::Min => self.min.map_or(NoValue, Number),
            AggregateFn::Max => self.max.map_or(NoValue, Number),
            AggregateFn::Mean => {
                if self.count == 0 {
                    NoValue
                } else {
                    Number(self.sum / self.count as f64)
                }
            }
            AggregateFn::Range => match (self.min, self.max) {
                (Some(lo), Some(hi)) => Number(hi - lo),
                _ => NoValue,
            },
            // Population variance; fewer than two values yield 0 rather
            // than an error.
            AggregateFn::Var => Number(self.variance()),
            AggregateFn::Std => Number(self.variance().sqrt()),
            AggregateFn::First => self.first.clone().map_or(NoValue, Single),
            AggregateFn::Last => self.last.clone().map_or(NoValue, Single),
            AggregateFn::Median => self.median().map_or(NoValue, Number),
            AggregateFn::Unique => Many(self.unique()),
            AggregateFn::Mode => self.mode().map_or(NoValue, Single),
        }
    }

    fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        // Guard against a slightly negative result from rounding.
        (self.sum_sq / n - mean * mean).max(0.0)
    }

    fn median(&self) -> Option<f64> {
        let mut nums: Vec<f64> = self.values.iter().filter_map(Value::as_f64).collect();
        if nums.is_empty() {
            return None;
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mid = nums.len() / 2;
        if nums.len() % 2 == 1 {
            Some(nums[mid])
        } else {
            Some((nums[mid - 1] + nums[mid]) / 2.0)
        }
    }

    /// Distinct values in first-seen order.
    fn unique(&self) -> Vec<Value> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for v in &self.values {
            if seen.insert(v.clone()) {
                out.push(v.clone());
            }
        }
        out
    }

    /// Most frequent value; ties break toward the value seen first.
    fn mode(&self) -> Option<Value> {
        let mut counts: std::collections::HashMap<&Value, u64> = std::collections::HashMap::new();
        for v in &self.values {
            *counts.entry(v).or_insert(0) += 1;
        }
        let mut best: Option<(&Value, u64)> = None;
        for v in &self.values {
            let c = counts[v];
            match best {
                Some((_, best_c)) if c <= best_c => {}
                _ => best = Some((v, c)),
            }
        }
        best.map(|(v, _)| v.clone())
    }
}

/// Final, reconciled output of a task over the whole dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutput {
    FilterIds(Vec<u64>),
    Groups(Vec<GroupEntry>),
    Aggregates(Vec<ColumnAggregates>),
}

/// Per-chunk payload persisted by the orchestrator. Aggregation keeps
/// partials, not finalized numbers, so the reconciler can recompute
/// whole-dataset aggregates exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchContent {
    FilterIds(Vec<u64>),
    Groups(Vec<GroupEntry>),
    Aggregate(Vec<AggregatePartial>),
}

/// Outcome of one (task, chunk) execution. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub task_id: TaskId,
    pub run_id: RunId,
    pub chunk_index: u32,
    pub input_rows: u64,
    /// None for aggregation.
    pub output_rows: Option<u64>,
    pub samples: Vec<ResourceSample>,
    pub content: BatchContent,
    pub created_at: DateTime<Utc>,
}
