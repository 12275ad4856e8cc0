//! DPI Ingest Library
//!
//! The intake stage of the document-processing pipeline. For each run it:
//!
//! - downloads new documents from their source, normalizes them to the
//!   canonical PDF format, and writes them to a content-addressed cache;
//! - routes field-level updates to existing documents into cache actions
//!   (update in place, archive for reprocessing, restore from archive) and
//!   applies them across every pipeline stage;
//! - fans the work out over a bounded set of tasks and writes a single run
//!   report when everything has completed.
//!
//! All shared state lives in the object store; tasks share nothing in
//! memory.
//!
//! # Example
//!
//! ```no_run
//! use dpi_ingest::updates::router::{classify, order_actions};
//! use dpi_common::types::{FieldUpdate, UpdateType};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let update = FieldUpdate {
//!     update_type: UpdateType::Name,
//!     new_value: json!("New name"),
//!     expected_value: json!("Old name"),
//! };
//! let action = classify(&update)?;
//! let ordered = order_actions(vec![(update, action)]);
//! assert_eq!(ordered.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod content_type;
pub mod coordinator;
pub mod download;
pub mod intake;
pub mod render;
pub mod storage;
pub mod updates;
