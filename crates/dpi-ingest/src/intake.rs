//! Intake of new documents
//!
//! For each new document: download the source content, normalize it to the
//! canonical PDF format, hash it, write it to a content-addressed key in
//! the document cache, and produce the parser-input record for the next
//! pipeline stage.

use dpi_common::checksum::compute_md5;
use dpi_common::types::{CacheRecord, Document, HandleResult, UploadResult};
use dpi_common::{IngestError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::content_type::{
    resolve_content_type, CONTENT_TYPE_DOC, CONTENT_TYPE_DOCX, CONTENT_TYPE_HTML, CONTENT_TYPE_PDF,
};
use crate::download::Downloader;
use crate::render::DocumentRenderer;
use crate::storage::ObjectStore;

/// The ext4 /tmp staging filesystem caps file names at 255 bytes; slugs are
/// trimmed to 200 to leave room for the hash and suffix
const MAX_SLUG_BYTES: usize = 200;

/// S3 caps object keys at 1024 bytes
const MAX_KEY_BYTES: usize = 1024;

/// Downloads, normalizes, and caches new documents
#[derive(Clone)]
pub struct IntakeEngine {
    store: Arc<dyn ObjectStore>,
    downloader: Downloader,
    renderer: Arc<dyn DocumentRenderer>,
}

impl IntakeEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        downloader: Downloader,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Self {
        Self {
            store,
            downloader,
            renderer,
        }
    }

    /// Ingest one document and build its parser-input record.
    ///
    /// Always returns a populated result; failures are carried in the
    /// `error` field rather than raised, so one bad document never aborts
    /// the batch.
    pub async fn handle_document(&self, document: &Document) -> HandleResult {
        info!(document_id = %document.import_id, "Handling new document");

        let mut parser_input = CacheRecord {
            document_id: document.import_id.clone(),
            document_name: document.name.clone(),
            document_description: document.description.clone(),
            document_source_url: document.source_url.clone(),
            document_cdn_object: None,
            document_content_type: None,
            document_md5_sum: None,
            document_metadata: serde_json::to_value(document).unwrap_or_default(),
            document_slug: document.slug.clone(),
            extra: BTreeMap::new(),
        };

        match self.upload_document(document).await {
            Ok(upload) => {
                parser_input.document_cdn_object = upload.cdn_object;
                parser_input.document_content_type = upload.content_type;
                parser_input.document_md5_sum = upload.md5_sum;
                HandleResult {
                    parser_input,
                    error: None,
                }
            },
            Err(e) => {
                warn!(
                    document_id = %document.import_id,
                    error = %e,
                    "Ingesting document failed"
                );
                HandleResult {
                    parser_input,
                    error: Some(e.to_string()),
                }
            },
        }
    }

    /// Download, normalize, hash, and cache one document's content.
    ///
    /// Exactly one object write happens per call, or none on skip/error.
    async fn upload_document(&self, document: &Document) -> Result<UploadResult> {
        let source_url = match document
            .download_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(document.source_url.as_deref().filter(|u| !u.is_empty()))
        {
            Some(url) => url,
            None => {
                info!(
                    document_id = %document.import_id,
                    "Skipping content caching because both source and download URLs are empty"
                );
                return Ok(UploadResult::default());
            },
        };

        let downloaded = self.downloader.fetch(source_url).await?;
        let content_type =
            resolve_content_type(&downloaded.data, source_url, &downloaded.content_type_header);

        let canonical = match content_type.as_str() {
            CONTENT_TYPE_PDF => downloaded.data,
            CONTENT_TYPE_HTML => self.renderer.capture_webpage(source_url).await?,
            CONTENT_TYPE_DOC | CONTENT_TYPE_DOCX => {
                self.renderer.render(&downloaded.data, &content_type).await?
            },
            other => return Err(IngestError::UnsupportedContentType(other.to_string())),
        };

        let md5_sum = compute_md5(&canonical);
        let prefix = format!(
            "{}/{}",
            document.geography,
            document.publication_ts.format("%Y")
        );
        let key = build_cache_key(&prefix, &slug::slugify(&document.name), &md5_sum, ".pdf");

        info!(
            document_id = %document.import_id,
            key = %key,
            "Caching canonical document content"
        );
        self.store
            .put(&key, canonical, Some(CONTENT_TYPE_PDF.to_string()))
            .await?;

        Ok(UploadResult {
            cdn_object: Some(key),
            md5_sum: Some(md5_sum),
            content_type: Some(content_type),
        })
    }
}

/// Build the content-addressed cache key `{prefix}/{slug}_{hash}{suffix}`.
///
/// The slug is trimmed to [`MAX_SLUG_BYTES`] first (staging-filesystem
/// limit), then trimmed further so the whole key stays within
/// [`MAX_KEY_BYTES`] (object-store limit). Truncation order matters.
pub fn build_cache_key(prefix: &str, slug: &str, hash: &str, suffix: &str) -> String {
    let slug = truncate_utf8(slug, MAX_SLUG_BYTES);

    // "/" between prefix and name, "_" between name and hash
    let budget = MAX_KEY_BYTES
        .saturating_sub(prefix.len())
        .saturating_sub(hash.len())
        .saturating_sub(suffix.len())
        .saturating_sub(2);
    let slug = truncate_utf8(slug, budget);

    format!("{}/{}_{}{}", prefix, slug, hash, suffix)
}

/// Truncate to at most `max_bytes` of UTF-8 without splitting a character
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
