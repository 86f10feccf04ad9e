pub mod job;
pub mod operation;
pub mod output;
pub mod task;
