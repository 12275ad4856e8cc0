//! Common types used across the ingest stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A document description received from the backend batch input.
///
/// Created once per run and immutable afterwards; the ingest stage never
/// mutates this in-memory value, only the cached JSON records derived from
/// it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique, stable document identifier (e.g. "CCLW.executive.1.1")
    pub import_id: String,

    /// Display name of the document
    pub name: String,

    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// URL-safe slug used to build cache keys
    pub slug: String,

    /// Generic source URL from the upstream catalog
    #[serde(default)]
    pub source_url: Option<String>,

    /// Direct download URL, preferred over `source_url` when present
    #[serde(default)]
    pub download_url: Option<String>,

    /// ISO geography code used as the first cache-key component
    pub geography: String,

    /// Publication timestamp; the year is the second cache-key component
    pub publication_ts: DateTime<Utc>,

    /// Opaque upstream metadata, carried into the cache record unmodified
    #[serde(default)]
    pub metadata: Value,
}

/// The set of document fields the update path knows how to handle.
///
/// Classification fails closed: any field outside this set is rejected with
/// [`crate::IngestError::UnsupportedUpdateField`], never silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Name,
    Description,
    SourceUrl,
    Metadata,
    Slug,
    /// Explicit operator-requested reprocess marker
    Reprocess,
    DocumentStatus,
}

impl UpdateType {
    /// Name of the cache-record field this update type mutates.
    ///
    /// `Reprocess` and `DocumentStatus` drive whole-record moves and have no
    /// field of their own.
    pub fn pipeline_field(&self) -> Option<&'static str> {
        match self {
            UpdateType::Name => Some("document_name"),
            UpdateType::Description => Some("document_description"),
            UpdateType::SourceUrl => Some("document_source_url"),
            UpdateType::Metadata => Some("document_metadata"),
            UpdateType::Slug => Some("document_slug"),
            UpdateType::Reprocess | UpdateType::DocumentStatus => None,
        }
    }
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UpdateType::Name => "name",
            UpdateType::Description => "description",
            UpdateType::SourceUrl => "source_url",
            UpdateType::Metadata => "metadata",
            UpdateType::Slug => "slug",
            UpdateType::Reprocess => "reprocess",
            UpdateType::DocumentStatus => "document_status",
        };
        write!(f, "{}", name)
    }
}

/// Terminal document status values the update path acts on
pub const STATUS_PUBLISHED: &str = "PUBLISHED";
pub const STATUS_DELETED: &str = "DELETED";

/// A single claimed change to one field of one document's cached record.
///
/// `expected_value` is the value believed to be currently present in the
/// cache; it is verified optimistically before the write (a mismatch is
/// logged, not fatal).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldUpdate {
    #[serde(rename = "type")]
    pub update_type: UpdateType,

    /// The value to write
    pub new_value: Value,

    /// The value expected to be currently present in the cache
    #[serde(default)]
    pub expected_value: Value,
}

/// Minimal parser-input record written under `{parser_input}/{id}.json`.
///
/// The cached records at later stages carry extra stage-dependent fields;
/// `extra` preserves them byte-for-byte on read-modify-write cycles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheRecord {
    pub document_id: String,
    pub document_name: String,
    pub document_description: String,
    pub document_source_url: Option<String>,
    pub document_cdn_object: Option<String>,
    pub document_content_type: Option<String>,
    pub document_md5_sum: Option<String>,
    pub document_metadata: Value,
    pub document_slug: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Information generated while caching a document's content, consumed by
/// later pipeline stages
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UploadResult {
    pub cdn_object: Option<String>,
    pub md5_sum: Option<String>,
    pub content_type: Option<String>,
}

/// Result of handling one new document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleResult {
    pub parser_input: CacheRecord,
    pub error: Option<String>,
}

/// Kind of work a task performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestKind {
    New,
    Updated,
}

/// The unit of the final run report; one per submitted document,
/// regardless of success
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    pub document_id: String,
    pub kind: IngestKind,
    pub error: Option<String>,
}

/// Batch descriptor read once at the start of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub new_documents: Vec<Document>,

    /// Updates grouped by document id; one group is processed by exactly
    /// one task, sequentially
    #[serde(default)]
    pub updated_documents: BTreeMap<String, Vec<FieldUpdate>>,
}

/// Per-run pointer file written by the scheduler, locating the input
/// directory for this execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionData {
    pub input_dir_path: String,
}
