//! # cellarium-core
//!
//! Core types, traits, and configuration for the cellarium ingest
//! orchestrator.
//!
//! This crate provides the foundational data structures, the error type, the
//! repository trait definitions, and the read-only orchestrator configuration
//! that the other cellarium crates depend on.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
