//! Core pipeline orchestration and domain logic for EntityLens.
//!
//! This crate ties the model, search, and extraction capabilities into the
//! four-stage enrichment run, and provides the batch runner, run persistence,
//! and the cross-run aggregator.

pub mod aggregate;
pub mod batch;
pub mod input;
pub mod literal;
pub mod persist;
pub mod pipeline;
pub mod prompts;
pub mod stages;

#[cfg(test)]
mod test_support;

pub use aggregate::{AggregateReport, aggregate, write_csv, write_json};
pub use batch::{BatchConfig, BatchProgress, BatchResult, run_batch};
pub use pipeline::{Capabilities, Pipeline, RunProgress, SilentProgress};
pub use prompts::Prompts;
pub use stages::{GatherOptions, Stage};
