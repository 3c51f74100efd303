//! Approval request processing pipeline — library crate.
//!
//! Re-exports the pipeline modules for the `arxd` binary and the
//! integration tests in `tests/`.

pub mod cli;
pub mod config;
pub mod errors;
pub mod models;
pub mod notification;
pub mod processor;
pub mod queue;
pub mod receiver;
pub mod store;
pub mod tenant;
