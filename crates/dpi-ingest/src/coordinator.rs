//! Fan-out of batch work across a bounded pool of tasks
//!
//! One task per new document or per document's update group, bounded by a
//! semaphore. Results are collected in completion order; a task failure is
//! attached to its document's result and never aborts the batch. A single
//! run report (and, when errors occurred, an error manifest) is written at
//! the end.

use dpi_common::types::{Batch, Document, FieldUpdate, IngestKind, IngestResult};
use dpi_common::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::intake::IntakeEngine;
use crate::storage::ObjectStore;
use crate::updates::{classify, order_actions, PipelineCache};

/// Drives one batch run end to end
pub struct Coordinator {
    intake: IntakeEngine,
    cache: PipelineCache,
    store: Arc<dyn ObjectStore>,
    parser_input_prefix: String,
    worker_count: usize,
}

impl Coordinator {
    pub fn new(
        intake: IntakeEngine,
        cache: PipelineCache,
        store: Arc<dyn ObjectStore>,
        parser_input_prefix: String,
        worker_count: usize,
    ) -> Self {
        Self {
            intake,
            cache,
            store,
            parser_input_prefix,
            worker_count: worker_count.max(1),
        }
    }

    /// Process a whole batch: updates first, then new documents, then the
    /// run report. Per-document failures land in the results; only an
    /// unwritable report is a run-level error.
    pub async fn run(&self, batch: Batch, updates_key: &str) -> Result<Vec<IngestResult>> {
        info!(
            new_documents = batch.new_documents.len(),
            updated_documents = batch.updated_documents.len(),
            worker_count = self.worker_count,
            "Starting batch run"
        );

        let mut results = self.process_updates(batch.updated_documents).await;
        results.extend(self.process_new_documents(batch.new_documents).await);

        self.persist_report(&results, updates_key).await?;
        Ok(results)
    }

    /// One task per document's update group; updates within a group run
    /// sequentially inside their task, in routed order.
    async fn process_updates(
        &self,
        updated_documents: BTreeMap<String, Vec<FieldUpdate>>,
    ) -> Vec<IngestResult> {
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut join_set = JoinSet::new();
        let mut task_documents = HashMap::new();

        for (document_id, updates) in updated_documents {
            let cache = self.cache.clone();
            let semaphore = semaphore.clone();
            let task_id = join_set
                .spawn({
                    let document_id = document_id.clone();
                    async move {
                        let _permit = semaphore.acquire_owned().await.ok();
                        apply_document_updates(cache, document_id, updates).await
                    }
                })
                .id();
            task_documents.insert(task_id, document_id);
        }

        collect(join_set, task_documents, IngestKind::Updated).await
    }

    /// One task per new document; each writes its own parser input record
    async fn process_new_documents(&self, new_documents: Vec<Document>) -> Vec<IngestResult> {
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut join_set = JoinSet::new();
        let mut task_documents = HashMap::new();

        for document in new_documents {
            let intake = self.intake.clone();
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let import_id = document.import_id.clone();
            let parser_input_key = format!(
                "{}/{}.json",
                self.parser_input_prefix, document.import_id
            );
            let task_id = join_set
                .spawn({
                    let document_id = document.import_id.clone();
                    async move {
                        let _permit = semaphore.acquire_owned().await.ok();
                        let handled = intake.handle_document(&document).await;

                        let mut error = handled.error;
                        match serde_json::to_vec(&handled.parser_input) {
                            Ok(body) => {
                                if let Err(e) = store
                                    .put(&parser_input_key, body, Some("application/json".to_string()))
                                    .await
                                {
                                    error.get_or_insert_with(String::new).push_str(&format!(
                                        "; writing parser input '{}': {}",
                                        parser_input_key, e
                                    ));
                                }
                            },
                            Err(e) => {
                                error.get_or_insert_with(String::new).push_str(&format!(
                                    "; serializing parser input for '{}': {}",
                                    document_id, e
                                ));
                            },
                        }

                        IngestResult {
                            document_id,
                            kind: IngestKind::New,
                            error: error.map(|e| e.trim_start_matches("; ").to_string()),
                        }
                    }
                })
                .id();
            task_documents.insert(task_id, import_id);
        }

        collect(join_set, task_documents, IngestKind::New).await
    }

    /// Write the run report next to the batch input, and the error
    /// manifest when any task failed.
    async fn persist_report(&self, results: &[IngestResult], updates_key: &str) -> Result<()> {
        let stem = updates_key.strip_suffix(".json").unwrap_or(updates_key);

        let report_key = format!("{}_report.json", stem);
        self.store
            .put(
                &report_key,
                serde_json::to_vec(results)?,
                Some("application/json".to_string()),
            )
            .await?;
        info!(key = %report_key, results = results.len(), "Wrote run report");

        let error_lines: Vec<String> = results
            .iter()
            .filter_map(|r| {
                r.error.as_ref().map(|e| {
                    let verb = match r.kind {
                        IngestKind::New => "ingesting",
                        IngestKind::Updated => "updating",
                    };
                    format!("ERROR {} '{}': {}", verb, r.document_id, e)
                })
            })
            .collect();

        if !error_lines.is_empty() {
            let errors_key = format!("{}.json_errors", stem);
            self.store
                .put(
                    &errors_key,
                    serde_json::to_vec(&error_lines)?,
                    Some("application/json".to_string()),
                )
                .await?;
            info!(key = %errors_key, errors = error_lines.len(), "Wrote error manifest");
        }

        Ok(())
    }
}

/// Classify, order, and apply one document's updates sequentially
async fn apply_document_updates(
    cache: PipelineCache,
    document_id: String,
    updates: Vec<FieldUpdate>,
) -> IngestResult {
    let mut errors = Vec::new();
    let mut routed = Vec::new();

    for update in updates {
        match classify(&update) {
            Ok(action) => routed.push((update, action)),
            Err(e) => errors.push(format!("classifying '{}' update: {}", update.update_type, e)),
        }
    }

    for (update, action) in order_actions(routed) {
        errors.extend(cache.apply(&document_id, &update, action).await);
    }

    IngestResult {
        document_id,
        kind: IngestKind::Updated,
        error: if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        },
    }
}

/// Drain a join set in completion order, converting panicked or cancelled
/// tasks into per-document error results
async fn collect(
    mut join_set: JoinSet<IngestResult>,
    task_documents: HashMap<tokio::task::Id, String>,
    kind: IngestKind,
) -> Vec<IngestResult> {
    let mut results = Vec::new();

    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((_, result)) => results.push(result),
            Err(e) => {
                let document_id = task_documents
                    .get(&e.id())
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                error!(
                    document_id = %document_id,
                    error = %e,
                    "Worker task died"
                );
                results.push(IngestResult {
                    document_id,
                    kind,
                    error: Some(format!("worker task died: {}", e)),
                });
            },
        }
    }

    results
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::UpdateConfig;
    use crate::download::{DownloadConfig, Downloader};
    use crate::render::DocumentRenderer;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use dpi_common::types::UpdateType;
    use dpi_common::{IngestError, Result};
    use serde_json::json;

    struct UnusedRenderer;

    #[async_trait]
    impl DocumentRenderer for UnusedRenderer {
        async fn render(&self, _data: &[u8], _content_type: &str) -> Result<Vec<u8>> {
            Err(IngestError::Render("not available in tests".to_string()))
        }

        async fn capture_webpage(&self, _url: &str) -> Result<Vec<u8>> {
            Err(IngestError::Render("not available in tests".to_string()))
        }
    }

    fn coordinator(store: Arc<MemoryStore>) -> Coordinator {
        let intake = IntakeEngine::new(
            store.clone(),
            Downloader::new(DownloadConfig::default()).unwrap(),
            Arc::new(UnusedRenderer),
        );
        let cache = PipelineCache::new(store.clone(), UpdateConfig::default());
        Coordinator::new(intake, cache, store, "parser_input".to_string(), 2)
    }

    fn document(import_id: &str) -> Document {
        Document {
            import_id: import_id.to_string(),
            name: "A document".to_string(),
            description: "d".to_string(),
            slug: "a-document".to_string(),
            source_url: None,
            download_url: None,
            geography: "ALB".to_string(),
            publication_ts: Utc::now(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn test_run_processes_updates_and_new_documents() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                "parser_input/CCLW.executive.1.1.json",
                serde_json::to_vec(&json!({"document_id": "CCLW.executive.1.1", "document_name": "old"}))
                    .unwrap(),
                None,
            )
            .await
            .unwrap();

        let mut updated_documents = BTreeMap::new();
        updated_documents.insert(
            "CCLW.executive.1.1".to_string(),
            vec![FieldUpdate {
                update_type: UpdateType::Name,
                new_value: json!("new"),
                expected_value: json!("old"),
            }],
        );
        let batch = Batch {
            new_documents: vec![document("CCLW.executive.2.2")],
            updated_documents,
        };

        let results = coordinator(store.clone())
            .run(batch, "input/updates.json")
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.error.is_none()), "{:?}", results);

        // the in-place update landed
        let data = store
            .get("parser_input/CCLW.executive.1.1.json")
            .await
            .unwrap()
            .unwrap();
        let record: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(record["document_name"], json!("new"));

        // the new document produced a parser input record (no source URL,
        // so no cached content)
        let data = store
            .get("parser_input/CCLW.executive.2.2.json")
            .await
            .unwrap()
            .unwrap();
        let record: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(record["document_cdn_object"], serde_json::Value::Null);

        // the report sits next to the batch input
        assert!(store.exists("input/updates_report.json").await.unwrap());
        assert!(!store.exists("input/updates.json_errors").await.unwrap());
    }

    #[tokio::test]
    async fn test_unsupported_update_is_isolated_and_reported() {
        let store = Arc::new(MemoryStore::new());
        let mut updated_documents = BTreeMap::new();
        updated_documents.insert(
            "bad.1".to_string(),
            vec![FieldUpdate {
                update_type: UpdateType::DocumentStatus,
                new_value: json!("LIMBO"),
                expected_value: json!("PUBLISHED"),
            }],
        );
        updated_documents.insert(
            "good.1".to_string(),
            vec![FieldUpdate {
                update_type: UpdateType::Name,
                new_value: json!("n"),
                expected_value: serde_json::Value::Null,
            }],
        );
        let batch = Batch {
            new_documents: vec![],
            updated_documents,
        };

        let results = coordinator(store.clone())
            .run(batch, "input/updates.json")
            .await
            .unwrap();

        let bad = results.iter().find(|r| r.document_id == "bad.1").unwrap();
        assert!(bad.error.as_ref().unwrap().contains("LIMBO"));
        let good = results.iter().find(|r| r.document_id == "good.1").unwrap();
        assert!(good.error.is_none());

        let manifest = store
            .get("input/updates.json_errors")
            .await
            .unwrap()
            .unwrap();
        let lines: Vec<String> = serde_json::from_slice(&manifest).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERROR updating 'bad.1':"));
    }
}
