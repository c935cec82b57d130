//! Shared types, error model, and configuration for EntityLens.
//!
//! This crate is the foundation depended on by all other EntityLens crates.
//! It provides:
//! - [`EntityLensError`]: the unified error type
//! - Domain types ([`RunState`], [`RunRecord`], [`EntityKey`], [`AggregateRow`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchSettings, GatherMode, LlmConfig, PathsConfig, RetryConfig, SearchConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_config,
};
pub use error::{EntityLensError, Result};
pub use types::{
    AggregateRow, EntityKey, EntityMap, NO_RELEVANT_CONTENT, RetrievedDocument, RunInput,
    RunMeta, RunRecord, RunState, StateUpdate,
};
