//! Applying field-level updates to documents already in the pipeline

pub mod cache;
pub mod router;

pub use cache::{PipelineCache, PipelineStage};
pub use router::{classify, order_actions, UpdateAction};
