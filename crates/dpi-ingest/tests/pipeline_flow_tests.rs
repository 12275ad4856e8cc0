//! End-to-end batch runs over an in-memory object store
//!
//! These exercise the full path from batch descriptor to run report:
//! routing, ordered application of update actions, intake of new
//! documents, and report/error-manifest output.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dpi_common::checksum::compute_md5;
use dpi_common::types::{Batch, Document, FieldUpdate, UpdateType};
use dpi_ingest::config::UpdateConfig;
use dpi_ingest::coordinator::Coordinator;
use dpi_ingest::download::{DownloadConfig, Downloader};
use dpi_ingest::intake::IntakeEngine;
use dpi_ingest::render::DocumentRenderer;
use dpi_ingest::storage::{MemoryStore, ObjectStore};
use dpi_ingest::updates::PipelineCache;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct UnusedRenderer;

#[async_trait]
impl DocumentRenderer for UnusedRenderer {
    async fn render(&self, _data: &[u8], _content_type: &str) -> dpi_common::Result<Vec<u8>> {
        panic!("renderer must not be called in this test");
    }

    async fn capture_webpage(&self, _url: &str) -> dpi_common::Result<Vec<u8>> {
        panic!("renderer must not be called in this test");
    }
}

fn coordinator(pipeline: Arc<MemoryStore>, documents: Arc<MemoryStore>) -> Coordinator {
    let intake = IntakeEngine::new(
        documents,
        Downloader::new(DownloadConfig {
            timeout_secs: 5,
            max_retries: 1,
        })
        .expect("downloader builds"),
        Arc::new(UnusedRenderer),
    );
    let cache = PipelineCache::new(pipeline.clone(), UpdateConfig::default());
    Coordinator::new(intake, cache, pipeline, "parser_input".to_string(), 2)
}

async fn seed_record(store: &MemoryStore, key: &str, name: &str) -> Result<()> {
    let record = json!({
        "document_id": "CCLW.executive.1.1",
        "document_name": name,
        "document_description": "about things",
        "document_source_url": "https://example.org/old.pdf",
    });
    store.put(key, serde_json::to_vec(&record)?, None).await?;
    Ok(())
}

fn update(update_type: UpdateType, new_value: serde_json::Value) -> FieldUpdate {
    FieldUpdate {
        update_type,
        new_value,
        expected_value: serde_json::Value::Null,
    }
}

fn batch_for(document_id: &str, updates: Vec<FieldUpdate>) -> Batch {
    let mut updated_documents = BTreeMap::new();
    updated_documents.insert(document_id.to_string(), updates);
    Batch {
        new_documents: vec![],
        updated_documents,
    }
}

#[tokio::test]
async fn test_source_url_update_archives_every_stage() -> Result<()> {
    let pipeline = Arc::new(MemoryStore::new());
    seed_record(&pipeline, "parser_input/CCLW.executive.1.1.json", "n").await?;
    seed_record(&pipeline, "embeddings_input/CCLW.executive.1.1.json", "n").await?;
    seed_record(&pipeline, "indexer_input/CCLW.executive.1.1.json", "n").await?;
    pipeline
        .put("indexer_input/CCLW.executive.1.1.npy", vec![1, 2], None)
        .await?;

    let batch = batch_for(
        "CCLW.executive.1.1",
        vec![update(UpdateType::SourceUrl, json!("https://example.org/new.pdf"))],
    );
    let results = coordinator(pipeline.clone(), Arc::new(MemoryStore::new()))
        .run(batch, "input/db_state.json")
        .await?;

    assert_eq!(results.len(), 1);
    assert!(results[0].error.is_none(), "{:?}", results[0]);

    for stage in ["parser_input", "embeddings_input", "indexer_input"] {
        assert!(
            !pipeline
                .exists(&format!("{}/CCLW.executive.1.1.json", stage))
                .await?,
            "{} should be archived",
            stage
        );
        assert_eq!(
            pipeline
                .list(&format!("archive/{}/CCLW.executive.1.1/", stage))
                .await?
                .iter()
                .filter(|k| k.ends_with(".json"))
                .count(),
            1
        );
    }
    assert_eq!(
        pipeline
            .list("archive/indexer_input/CCLW.executive.1.1/")
            .await?
            .iter()
            .filter(|k| k.ends_with(".npy"))
            .count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_field_update_applies_before_archiving() -> Result<()> {
    let pipeline = Arc::new(MemoryStore::new());
    seed_record(&pipeline, "parser_input/CCLW.executive.1.1.json", "old name").await?;

    // reprocess listed first; the router must still run the name change
    // before the record is moved to the archive
    let batch = batch_for(
        "CCLW.executive.1.1",
        vec![
            update(UpdateType::SourceUrl, json!("https://example.org/new.pdf")),
            update(UpdateType::Name, json!("new name")),
        ],
    );
    let results = coordinator(pipeline.clone(), Arc::new(MemoryStore::new()))
        .run(batch, "input/db_state.json")
        .await?;
    assert!(results[0].error.is_none(), "{:?}", results[0]);

    let archived = pipeline.list("archive/parser_input/CCLW.executive.1.1/").await?;
    assert_eq!(archived.len(), 1);
    let data = pipeline.get(&archived[0]).await?.expect("archived record");
    let record: serde_json::Value = serde_json::from_slice(&data)?;
    assert_eq!(record["document_name"], json!("new name"));
    Ok(())
}

#[tokio::test]
async fn test_publish_restores_latest_archived_snapshot() -> Result<()> {
    let pipeline = Arc::new(MemoryStore::new());
    pipeline
        .put(
            "archive/parser_input/CCLW.executive.1.1/2022-03-01-10-00-00.json",
            b"older".to_vec(),
            None,
        )
        .await?;
    pipeline
        .put(
            "archive/parser_input/CCLW.executive.1.1/2023-03-01-10-00-00.json",
            b"newer".to_vec(),
            None,
        )
        .await?;

    let batch = batch_for(
        "CCLW.executive.1.1",
        vec![update(UpdateType::DocumentStatus, json!("PUBLISHED"))],
    );
    let results = coordinator(pipeline.clone(), Arc::new(MemoryStore::new()))
        .run(batch, "input/db_state.json")
        .await?;
    assert!(results[0].error.is_none(), "{:?}", results[0]);

    assert_eq!(
        pipeline.get("parser_input/CCLW.executive.1.1.json").await?,
        Some(b"newer".to_vec())
    );
    assert!(pipeline
        .exists("archive/parser_input/CCLW.executive.1.1/2022-03-01-10-00-00.json")
        .await?);
    Ok(())
}

#[tokio::test]
async fn test_delete_status_archives_like_reprocess() -> Result<()> {
    let pipeline = Arc::new(MemoryStore::new());
    seed_record(&pipeline, "parser_input/CCLW.executive.1.1.json", "n").await?;

    let batch = batch_for(
        "CCLW.executive.1.1",
        vec![update(UpdateType::DocumentStatus, json!("DELETED"))],
    );
    let results = coordinator(pipeline.clone(), Arc::new(MemoryStore::new()))
        .run(batch, "input/db_state.json")
        .await?;
    assert!(results[0].error.is_none(), "{:?}", results[0]);

    assert!(!pipeline.exists("parser_input/CCLW.executive.1.1.json").await?);
    assert_eq!(
        pipeline
            .list("archive/parser_input/CCLW.executive.1.1/")
            .await?
            .len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_new_document_is_downloaded_hashed_and_cached() -> Result<()> {
    let server = MockServer::start().await;
    let body = b"%PDF-1.4 a tiny document".to_vec();
    Mock::given(method("GET"))
        .and(path("/energy.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .insert_header("content-type", "application/pdf"),
        )
        .mount(&server)
        .await;

    let pipeline = Arc::new(MemoryStore::new());
    let documents = Arc::new(MemoryStore::new());
    let batch = Batch {
        new_documents: vec![Document {
            import_id: "CCLW.executive.2.2".to_string(),
            name: "Energy Strategy".to_string(),
            description: "d".to_string(),
            slug: "energy-strategy".to_string(),
            source_url: None,
            download_url: Some(format!("{}/energy.pdf", server.uri())),
            geography: "ALB".to_string(),
            publication_ts: Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap(),
            metadata: json!({}),
        }],
        updated_documents: BTreeMap::new(),
    };

    let results = coordinator(pipeline.clone(), documents.clone())
        .run(batch, "input/db_state.json")
        .await?;
    assert_eq!(results.len(), 1);
    assert!(results[0].error.is_none(), "{:?}", results[0]);

    let expected_key = format!("ALB/2020/energy-strategy_{}.pdf", compute_md5(&body));
    assert_eq!(documents.get(&expected_key).await?, Some(body.clone()));

    let data = pipeline
        .get("parser_input/CCLW.executive.2.2.json")
        .await?
        .expect("parser input record");
    let record: serde_json::Value = serde_json::from_slice(&data)?;
    assert_eq!(record["document_cdn_object"], json!(expected_key));
    assert_eq!(record["document_md5_sum"], json!(compute_md5(&body)));
    assert_eq!(record["document_content_type"], json!("application/pdf"));

    // the run report exists and holds the one result
    let report = pipeline
        .get("input/db_state_report.json")
        .await?
        .expect("run report");
    let parsed: Vec<serde_json::Value> = serde_json::from_slice(&report)?;
    assert_eq!(parsed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unsupported_download_format_lands_in_error_manifest() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"a,b,c".to_vec())
                .insert_header("content-type", "text/csv"),
        )
        .mount(&server)
        .await;

    let pipeline = Arc::new(MemoryStore::new());
    let batch = Batch {
        new_documents: vec![Document {
            import_id: "CCLW.executive.3.3".to_string(),
            name: "A spreadsheet".to_string(),
            description: "d".to_string(),
            slug: "a-spreadsheet".to_string(),
            source_url: Some(format!("{}/data.csv", server.uri())),
            download_url: None,
            geography: "ALB".to_string(),
            publication_ts: Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap(),
            metadata: json!({}),
        }],
        updated_documents: BTreeMap::new(),
    };

    let results = coordinator(pipeline.clone(), Arc::new(MemoryStore::new()))
        .run(batch, "input/db_state.json")
        .await?;
    assert_eq!(results.len(), 1);
    assert!(results[0].error.as_deref().unwrap_or("").contains("text/csv"));

    // the record is still written, without cached content
    let data = pipeline
        .get("parser_input/CCLW.executive.3.3.json")
        .await?
        .expect("parser input record");
    let record: serde_json::Value = serde_json::from_slice(&data)?;
    assert_eq!(record["document_cdn_object"], serde_json::Value::Null);

    let manifest = pipeline
        .get("input/db_state.json_errors")
        .await?
        .expect("error manifest");
    let lines: Vec<String> = serde_json::from_slice(&manifest)?;
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("ERROR ingesting 'CCLW.executive.3.3':"));
    Ok(())
}
