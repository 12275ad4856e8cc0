//! The external "render to canonical document" capability
//!
//! Conversion of web pages and word-processor formats to the canonical PDF
//! representation is not implemented here; it is consumed as an opaque
//! service behind [`DocumentRenderer`]. Any failure it reports is generic
//! and surfaces as a per-document ingest error.

use async_trait::async_trait;
use dpi_common::{IngestError, Result};
use serde_json::json;
use std::time::Duration;
use tracing::info;

/// Seconds to wait for a single render call; headless-browser captures of
/// heavy pages are slow
const RENDER_TIMEOUT_SECS: u64 = 120;

/// Converts arbitrary supported source formats into the canonical
/// single-file PDF representation
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render source bytes of the given content type to canonical PDF bytes
    async fn render(&self, data: &[u8], content_type: &str) -> Result<Vec<u8>>;

    /// Capture the web page at `url` as canonical PDF bytes
    async fn capture_webpage(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`DocumentRenderer`] backed by the render service over HTTP
#[derive(Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderer {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RENDER_TIMEOUT_SECS))
            .build()
            .map_err(|e| IngestError::Render(format!("build render client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn read_pdf_response(&self, response: reqwest::Response, what: &str) -> Result<Vec<u8>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Render(format!("{}: {} {}", what, status, body)));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| IngestError::Render(format!("{}: read body: {}", what, e)))?
            .to_vec();

        info!(bytes = data.len(), "Render service returned canonical document");
        Ok(data)
    }
}

#[async_trait]
impl DocumentRenderer for HttpRenderer {
    async fn render(&self, data: &[u8], content_type: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}/render", self.endpoint))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| IngestError::Render(format!("render call failed: {}", e)))?;

        self.read_pdf_response(response, "render").await
    }

    async fn capture_webpage(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}/capture", self.endpoint))
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(|e| IngestError::Render(format!("capture call failed: {}", e)))?;

        self.read_pdf_response(response, "capture").await
    }
}
