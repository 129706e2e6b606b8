//! WikiDraft Common Library
//!
//! Shared code for the WikiDraft service including:
//! - Entity, notability, draft and article records on a file-backed store
//! - The external prompt-job client abstraction
//! - Job tracking with staleness-driven retries
//! - Pipeline stage handlers
//! - Error types, configuration and metrics

pub mod config;
pub mod db;
pub mod errors;
pub mod jobs;
pub mod llm;
pub mod metrics;
pub mod pipeline;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Repository;
pub use errors::{AppError, Result};
pub use jobs::JobTracker;
pub use pipeline::Pipeline;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
