//! SiTeJo Common Library
//!
//! Shared code for the SiTeJo correspondence services including:
//! - Database models and repository patterns
//! - The ticket workflow (policy, transitions, letter numbers, history)
//! - Document blob storage
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod storage;
pub mod workflow;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
