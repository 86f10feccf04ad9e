pub mod dataset;
pub mod row;
