//! Declarative BigQuery tasks: load, query, copy, view and extract jobs
//! modelled as tasks with table outputs, plus a small dependency executor.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod storage;
pub mod target;
pub mod tasks;
pub mod types;
