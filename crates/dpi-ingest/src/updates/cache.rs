//! The pipeline cache state machine
//!
//! Three live stages hold one JSON record per document id (plus an optional
//! translated sibling, plus a binary sidecar at the indexer stage), and an
//! append-only archive holds timestamp-named retired copies. The three
//! operations here move documents between live and archived state; each
//! tolerates a missing object at any stage, because a crash between two
//! renames can leave a document half-archived and a later run must still
//! make progress.

use chrono::{DateTime, NaiveDateTime, Utc};
use dpi_common::types::FieldUpdate;
use dpi_common::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::UpdateConfig;
use crate::storage::ObjectStore;
use crate::updates::router::UpdateAction;

/// Timestamp embedded in archived object names
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Suffix of the translated-language sibling of a record
const TRANSLATED_SUFFIX: &str = "_translated_en";

/// The named live cache locations, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    ParserInput,
    EmbeddingsInput,
    IndexerInput,
}

/// One concrete object a document may own in the live cache: a stage, a
/// file extension, and whether it is the translated sibling
#[derive(Debug, Clone, Copy)]
struct Variant {
    stage: PipelineStage,
    ext: &'static str,
    translated: bool,
}

/// Every object shape a document can have across the three stages. The
/// binary sidecar exists only at the indexer stage.
const VARIANTS: [Variant; 8] = [
    Variant { stage: PipelineStage::ParserInput, ext: "json", translated: false },
    Variant { stage: PipelineStage::ParserInput, ext: "json", translated: true },
    Variant { stage: PipelineStage::EmbeddingsInput, ext: "json", translated: false },
    Variant { stage: PipelineStage::EmbeddingsInput, ext: "json", translated: true },
    Variant { stage: PipelineStage::IndexerInput, ext: "json", translated: false },
    Variant { stage: PipelineStage::IndexerInput, ext: "json", translated: true },
    Variant { stage: PipelineStage::IndexerInput, ext: "npy", translated: false },
    Variant { stage: PipelineStage::IndexerInput, ext: "npy", translated: true },
];

/// Applies update actions to the staged cache records of one document
#[derive(Clone)]
pub struct PipelineCache {
    store: Arc<dyn ObjectStore>,
    config: UpdateConfig,
}

impl PipelineCache {
    pub fn new(store: Arc<dyn ObjectStore>, config: UpdateConfig) -> Self {
        Self { store, config }
    }

    fn stage_prefix(&self, stage: PipelineStage) -> &str {
        match stage {
            PipelineStage::ParserInput => &self.config.parser_input,
            PipelineStage::EmbeddingsInput => &self.config.embeddings_input,
            PipelineStage::IndexerInput => &self.config.indexer_input,
        }
    }

    /// Key of a document's live object for one variant
    fn live_key(&self, document_id: &str, variant: Variant) -> String {
        format!(
            "{}/{}{}.{}",
            self.stage_prefix(variant.stage),
            document_id,
            if variant.translated { TRANSLATED_SUFFIX } else { "" },
            variant.ext
        )
    }

    /// Directory under the archive root holding one document's retired
    /// copies for one stage
    fn archive_dir(&self, document_id: &str, stage: PipelineStage) -> String {
        format!(
            "{}/{}/{}",
            self.config.archive_prefix,
            self.stage_prefix(stage),
            document_id
        )
    }

    /// Key of an archived copy: `{archive}/{stage}/{id}/{timestamp}[...].{ext}`
    fn archive_key(&self, document_id: &str, variant: Variant, timestamp: &str) -> String {
        format!(
            "{}/{}{}.{}",
            self.archive_dir(document_id, variant.stage),
            timestamp,
            if variant.translated { TRANSLATED_SUFFIX } else { "" },
            variant.ext
        )
    }

    /// Apply one routed update, returning the errors it produced.
    ///
    /// Partial failure is allowed; every error is reported, none aborts
    /// the remaining work for the document.
    pub async fn apply(
        &self,
        document_id: &str,
        update: &FieldUpdate,
        action: UpdateAction,
    ) -> Vec<String> {
        match action {
            UpdateAction::RestoreFromArchive => self.restore_from_archive(document_id).await,
            UpdateAction::UpdateInPlace => self.update_in_place(document_id, update).await,
            UpdateAction::ReprocessFromSource => self.reprocess_from_source(document_id).await,
        }
    }

    /// Mutate one field in every live JSON record of the document, then
    /// retire the indexer binary sidecars so the derived artifact is
    /// regenerated on the next pipeline run.
    pub async fn update_in_place(&self, document_id: &str, update: &FieldUpdate) -> Vec<String> {
        let mut errors = Vec::new();

        let field = match update.update_type.pipeline_field() {
            Some(field) => field,
            None => {
                errors.push(format!(
                    "update type '{}' has no pipeline field to mutate",
                    update.update_type
                ));
                return errors;
            },
        };

        for variant in VARIANTS.iter().filter(|v| v.ext == "json") {
            let key = self.live_key(document_id, *variant);
            if let Err(e) = self.update_json_field(&key, field, update).await {
                errors.push(format!("updating '{}': {}", key, e));
            }
        }

        // the .npy embedding no longer matches the mutated record
        let timestamp = Utc::now().format(ARCHIVE_TIMESTAMP_FORMAT).to_string();
        for variant in VARIANTS.iter().filter(|v| v.ext == "npy") {
            let from = self.live_key(document_id, *variant);
            let to = self.archive_key(document_id, *variant, &timestamp);
            if let Err(e) = self.store.rename(&from, &to).await {
                errors.push(format!("archiving '{}': {}", from, e));
            }
        }

        errors
    }

    /// Read one JSON record, set `field` to the update's new value, write
    /// it back. Missing record means the stage has nothing for this
    /// document, which is fine.
    async fn update_json_field(&self, key: &str, field: &str, update: &FieldUpdate) -> Result<()> {
        let data = match self.store.get(key).await? {
            Some(data) => data,
            None => {
                debug!(key = key, "No record at this stage, skipping field update");
                return Ok(());
            },
        };

        let mut record: serde_json::Value = serde_json::from_slice(&data)?;
        if !record.is_object() {
            return Err(dpi_common::IngestError::Storage(format!(
                "cached record '{}' is not a JSON object",
                key
            )));
        }
        let current = record.get(field).cloned().unwrap_or(serde_json::Value::Null);
        if current != update.expected_value {
            // the write still proceeds; the cache must converge on the
            // new state even when it drifted from what the caller saw
            warn!(
                key = key,
                field = field,
                current = %current,
                expected = %update.expected_value,
                "Field value does not match the expected previous value"
            );
        }

        record[field] = update.new_value.clone();
        info!(key = key, field = field, "Updated field in cached record");
        self.store
            .put(key, serde_json::to_vec(&record)?, Some("application/json".to_string()))
            .await
    }

    /// Retire every live object of the document into the archive under the
    /// current timestamp, clearing the way for a fresh ingest from source.
    pub async fn reprocess_from_source(&self, document_id: &str) -> Vec<String> {
        self.reprocess_from_source_at(document_id, Utc::now()).await
    }

    /// Timestamp-injectable body of [`Self::reprocess_from_source`]
    pub async fn reprocess_from_source_at(
        &self,
        document_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let timestamp = now.format(ARCHIVE_TIMESTAMP_FORMAT).to_string();
        let mut errors = Vec::new();

        for variant in VARIANTS {
            let from = self.live_key(document_id, variant);
            let to = self.archive_key(document_id, variant, &timestamp);
            match self.store.rename(&from, &to).await {
                Ok(true) => info!(from = %from, to = %to, "Archived cached record"),
                Ok(false) => {
                    debug!(key = %from, "No record at this stage, nothing to archive")
                },
                Err(e) => errors.push(format!("archiving '{}': {}", from, e)),
            }
        }

        errors
    }

    /// Bring the document's most recent archived snapshot back to its live
    /// stage paths. The latest timestamp is document-wide, taken across
    /// every stage/extension combination; only objects bearing it are
    /// restored, so older generations (e.g. a sidecar retired by an
    /// earlier in-place update) stay archived. An empty archive is a
    /// no-op.
    pub async fn restore_from_archive(&self, document_id: &str) -> Vec<String> {
        let mut errors = Vec::new();
        let mut snapshots: Vec<(Variant, NaiveDateTime, String)> = Vec::new();

        for variant in VARIANTS {
            match self.archived_snapshots(document_id, variant).await {
                Ok(found) => {
                    snapshots.extend(found.into_iter().map(|(ts, key)| (variant, ts, key)))
                },
                Err(e) => errors.push(format!(
                    "listing archive for '{}' at {:?}: {}",
                    document_id, variant.stage, e
                )),
            }
        }

        let Some(latest) = snapshots.iter().map(|(_, ts, _)| *ts).max() else {
            debug!(document_id = document_id, "Nothing archived, nothing to restore");
            return errors;
        };

        for (variant, timestamp, archived) in snapshots {
            if timestamp != latest {
                continue;
            }
            let live = self.live_key(document_id, variant);
            match self.store.rename(&archived, &live).await {
                Ok(true) => info!(from = %archived, to = %live, "Restored record from archive"),
                Ok(false) => debug!(key = %archived, "Archived copy vanished, skipping"),
                Err(e) => errors.push(format!("restoring '{}': {}", archived, e)),
            }
        }

        errors
    }

    /// Every archived copy of one variant, with the timestamp embedded in
    /// its object name
    async fn archived_snapshots(
        &self,
        document_id: &str,
        variant: Variant,
    ) -> Result<Vec<(NaiveDateTime, String)>> {
        let dir = format!("{}/", self.archive_dir(document_id, variant.stage));
        let suffix = format!(
            "{}.{}",
            if variant.translated { TRANSLATED_SUFFIX } else { "" },
            variant.ext
        );

        let mut snapshots = Vec::new();
        for key in self.store.list(&dir).await? {
            let name = key.rsplit('/').next().unwrap_or(&key);
            let Some(stem) = name.strip_suffix(&suffix) else {
                continue;
            };
            // a stem that is not a bare timestamp belongs to another
            // variant (e.g. the translated sibling when matching ".json")
            let Ok(timestamp) = NaiveDateTime::parse_from_str(stem, ARCHIVE_TIMESTAMP_FORMAT)
            else {
                continue;
            };
            snapshots.push((timestamp, key));
        }

        Ok(snapshots)
    }
}
