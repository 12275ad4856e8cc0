//! DPI Common Library
//!
//! Shared types, utilities, and error handling for the document pipeline
//! ingest stage.
//!
//! # Overview
//!
//! This crate provides common functionality used across all DPI workspace
//! members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: Content hashing for change detection and cache keys
//! - **Types**: Shared domain types for documents, updates, and run results
//!
//! # Example
//!
//! ```no_run
//! use dpi_common::checksum::compute_md5;
//!
//! fn cache_suffix(content: &[u8]) -> String {
//!     compute_md5(content)
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{IngestError, Result};
