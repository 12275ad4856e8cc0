//! Retrying HTTP download of source documents

use dpi_common::{IngestError, Result};
use rand::Rng;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum download attempts per document
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Backoff bounds between attempts (randomized exponential)
const BACKOFF_MIN_MS: u64 = 1_000;
const BACKOFF_MAX_MS: u64 = 10_000;

/// Downloader configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// A downloaded source document
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub data: Vec<u8>,
    /// Raw `Content-Type` header, may be empty
    pub content_type_header: String,
}

/// HTTP client for fetching source documents
#[derive(Clone)]
pub struct Downloader {
    client: Client,
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("dpi-ingest/0.1")
            .build()
            .map_err(|e| IngestError::Network(format!("build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Download a source URL with retry and backoff.
    ///
    /// On a 404 response, two URL mutations are attempted before the
    /// attempt counts as failed: stripping `%` characters, then re-encoding
    /// them as `%25`. This compensates for a class of malformed
    /// percent-encoded URLs in upstream catalogs.
    pub async fn fetch(&self, source_url: &str) -> Result<DownloadedFile> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            match self.fetch_once(source_url).await {
                Ok(file) => {
                    info!(
                        url = source_url,
                        bytes = file.data.len(),
                        "Downloaded source document"
                    );
                    return Ok(file);
                },
                Err(e) => {
                    warn!(
                        url = source_url,
                        attempt = attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Download attempt failed"
                    );
                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| IngestError::Download {
            url: source_url.to_string(),
            message: "download failed with no error captured".to_string(),
        }))
    }

    async fn fetch_once(&self, source_url: &str) -> Result<DownloadedFile> {
        let mut response = self.get(source_url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            // mutation 1 - remove %
            debug!(url = source_url, "Got 404, retrying with '%' stripped");
            response = self.get(&source_url.replace('%', "")).await?;
        }

        if response.status() == StatusCode::NOT_FOUND {
            // mutation 2 - replace % with the encoded version, i.e. %25
            debug!(url = source_url, "Still 404, retrying with '%' re-encoded");
            response = self.get(&source_url.replace('%', "%25")).await?;
        }

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Download {
                url: source_url.to_string(),
                message: format!("{} {}", status, truncate(&body, 512)),
            });
        }

        let content_type_header = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let data = response
            .bytes()
            .await
            .map_err(|e| IngestError::Network(format!("read body of '{}': {}", source_url, e)))?
            .to_vec();

        Ok(DownloadedFile {
            data,
            content_type_header,
        })
    }

    async fn get(&self, url: &str) -> Result<Response> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Network(format!("GET '{}': {}", url, e)))
    }
}

/// Randomized exponential backoff, capped at [`BACKOFF_MAX_MS`]
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_MIN_MS.saturating_mul(2u64.saturating_pow(attempt - 1));
    let cap = exp.min(BACKOFF_MAX_MS);
    let jittered = rand::thread_rng().gen_range(BACKOFF_MIN_MS..=cap.max(BACKOFF_MIN_MS));
    Duration::from_millis(jittered)
}

fn truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_within_bounds() {
        for attempt in 1..=DEFAULT_MAX_RETRIES {
            let delay = backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(BACKOFF_MIN_MS));
            assert!(delay <= Duration::from_millis(BACKOFF_MAX_MS));
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("héllo", 2), "h");
    }
}
