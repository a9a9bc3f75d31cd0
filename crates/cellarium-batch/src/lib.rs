//! # cellarium-batch
//!
//! Compute backend client for cellarium.
//!
//! This crate provides:
//! - Wire types for the cloud batch execution API
//! - An HTTP client implementing the [`ComputeBackend`] trait
//! - A scripted mock backend for deterministic tests

pub mod backend;
pub mod client;
pub mod mock;
pub mod types;

pub use backend::ComputeBackend;
pub use client::{normalize_error_body, BatchClient};
pub use mock::MockComputeBackend;
pub use types::*;
