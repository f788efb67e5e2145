//! Queue coordination: the persistence RPC surface and the worker runner.

pub mod rpc;
pub mod runner;

pub use rpc::{ClaimedEntry, ClassifyDetail, CompanyRow, QueueClient, SubmissionRecord};
pub use runner::Runner;
