use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// The three pipeline stages a run may request. A run carries an ordered
/// list of these; one task per (kind, variant) pair is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Filter,
    Group,
    Aggregate,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Filter => write!(f, "filter"),
            OperationKind::Group => write!(f, "group"),
            OperationKind::Aggregate => write!(f, "aggregate"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown operation '{0}', expected 'filter', 'group' or 'aggregate'")]
pub struct ParseOperationKindError(String);

impl FromStr for OperationKind {
    type Err = ParseOperationKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "filter" => Ok(OperationKind::Filter),
            "group" => Ok(OperationKind::Group),
            "aggregate" => Ok(OperationKind::Aggregate),
            other => Err(ParseOperationKindError(other.to_string())),
        }
    }
}

/// Which implementation processed a task. Baseline is the trusted
/// sequential pipeline, candidate the parallel one under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Baseline,
    Candidate,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Baseline => write!(f, "baseline"),
            Variant::Candidate => write!(f, "candidate"),
        }
    }
}

/// Who asked for the run: a user submission or the scheduled expansion
/// job. Validation processes system-triggered tasks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    User,
    System,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::User => write!(f, "user"),
            Trigger::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "contains")]
    Contains,
}

impl FilterOp {
    /// Ordering comparisons only make sense on number columns; equality
    /// also works on strings, and `contains` only on strings.
    pub fn requires_number(&self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Lt | FilterOp::Ge | FilterOp::Le)
    }

    pub fn requires_string(&self) -> bool {
        matches!(self, FilterOp::Contains)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Ge => ">=",
            FilterOp::Le => "<=",
            FilterOp::Contains => "contains",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
#[error("unknown filter operator '{0}'")]
pub struct ParseFilterOpError(String);

impl FromStr for FilterOp {
    type Err = ParseFilterOpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(FilterOp::Eq),
            "!=" => Ok(FilterOp::Ne),
            ">" => Ok(FilterOp::Gt),
            "<" => Ok(FilterOp::Lt),
            ">=" => Ok(FilterOp::Ge),
            "<=" => Ok(FilterOp::Le),
            "contains" => Ok(FilterOp::Contains),
            other => Err(ParseFilterOpError(other.to_string())),
        }
    }
}

/// One filter condition. Conditions on the same task are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }
}

/// Closed set of aggregation functions. All of them run on number
/// columns; anything outside this list is rejected when a run is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Sum,
    Min,
    Max,
    Mean,
    Count,
    Median,
    Std,
    Var,
    First,
    Last,
    Unique,
    Mode,
    Range,
}

impl AggregateFn {
    /// Functions whose result cannot be derived from running sums alone
    /// and need the raw column values retained per chunk.
    pub fn needs_raw_values(&self) -> bool {
        matches!(
            self,
            AggregateFn::Median | AggregateFn::Unique | AggregateFn::Mode
        )
    }
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateFn::Sum => "sum",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
            AggregateFn::Mean => "mean",
            AggregateFn::Count => "count",
            AggregateFn::Median => "median",
            AggregateFn::Std => "std",
            AggregateFn::Var => "var",
            AggregateFn::First => "first",
            AggregateFn::Last => "last",
            AggregateFn::Unique => "unique",
            AggregateFn::Mode => "mode",
            AggregateFn::Range => "range",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
#[error("unknown aggregation function '{0}'")]
pub struct ParseAggregateFnError(String);

impl FromStr for AggregateFn {
    type Err = ParseAggregateFnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregateFn::Sum),
            "min" => Ok(AggregateFn::Min),
            "max" => Ok(AggregateFn::Max),
            "mean" => Ok(AggregateFn::Mean),
            "count" => Ok(AggregateFn::Count),
            "median" => Ok(AggregateFn::Median),
            "std" => Ok(AggregateFn::Std),
            "var" => Ok(AggregateFn::Var),
            "first" => Ok(AggregateFn::First),
            "last" => Ok(AggregateFn::Last),
            "unique" => Ok(AggregateFn::Unique),
            "mode" => Ok(AggregateFn::Mode),
            "range" => Ok(AggregateFn::Range),
            other => Err(ParseAggregateFnError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateColumn {
    pub column: String,
    pub functions: Vec<AggregateFn>,
}

impl AggregateColumn {
    pub fn new(column: impl Into<String>, functions: Vec<AggregateFn>) -> Self {
        Self {
            column: column.into(),
            functions,
        }
    }
}

/// Parameters of a single pipeline stage, as submitted with a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationSpec {
    Filter { predicates: Vec<Predicate> },
    Group { keys: Vec<String> },
    Aggregate { columns: Vec<AggregateColumn> },
}

impl OperationSpec {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationSpec::Filter { .. } => OperationKind::Filter,
            OperationSpec::Group { .. } => OperationKind::Group,
            OperationSpec::Aggregate { .. } => OperationKind::Aggregate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operators_from_wire_form() {
        assert_eq!(">=".parse::<FilterOp>().unwrap(), FilterOp::Ge);
        assert_eq!("contains".parse::<FilterOp>().unwrap(), FilterOp::Contains);
        assert!("=~".parse::<FilterOp>().is_err());
    }

    #[test]
    fn operator_type_requirements() {
        assert!(FilterOp::Gt.requires_number());
        assert!(!FilterOp::Eq.requires_number());
        assert!(FilterOp::Contains.requires_string());
    }

    #[test]
    fn raw_value_functions_are_the_order_sensitive_ones() {
        assert!(AggregateFn::Median.needs_raw_values());
        assert!(AggregateFn::Mode.needs_raw_values());
        assert!(AggregateFn::Unique.needs_raw_values());
        assert!(!AggregateFn::Sum.needs_raw_values());
        assert!(!AggregateFn::Std.needs_raw_values());
    }

    #[test]
    fn spec_reports_its_kind() {
        let spec = OperationSpec::Group {
            keys: vec!["city".into()],
        };
        assert_eq!(spec.kind(), OperationKind::Group);
    }
}
