//! Object store access for the pipeline cache
//!
//! Everything the pipeline shares between tasks lives behind [`ObjectStore`]:
//! a thin, retrying abstraction over read/write/rename/exists/list against
//! S3-compatible storage. Renames are copy-then-delete and therefore not
//! atomic; callers treat a missing object at any stage as "not present yet"
//! rather than a hard error.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, primitives::ByteStream, Client};
use dpi_common::{IngestError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod config;
pub mod memory;

pub use memory::MemoryStore;

/// Maximum attempts for a single store operation
const MAX_ATTEMPTS: u32 = 4;

/// Backoff bounds for retries (randomized exponential)
const BACKOFF_MIN_MS: u64 = 1_000;
const BACKOFF_MAX_MS: u64 = 10_000;

/// Abstraction over the object store holding the pipeline cache.
///
/// Implementations must be cheap to clone into worker tasks; the S3 client
/// is constructed explicitly once per run and handles are cloned, never
/// shared through process-wide singletons.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object. Returns `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an object, overwriting any existing value.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<()>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List all keys under a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Move an object to a new key (copy + delete).
    ///
    /// Returns `Ok(false)` when the source does not exist; the caller
    /// decides whether that matters.
    async fn rename(&self, from: &str, to: &str) -> Result<bool>;
}

/// S3-backed [`ObjectStore`] bound to a single bucket
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(config: config::StorageConfig) -> Self {
        debug!(bucket = %config.bucket, "Initializing object store");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "dpi-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(bucket = %config.bucket, "Object store client initialized");

        Self {
            client,
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Run an operation with bounded, jittered exponential backoff.
    async fn with_retry<T, F, Fut>(&self, op_name: &str, key: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        operation = op_name,
                        key = key,
                        attempt = attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %e,
                        "Object store operation failed"
                    );
                    last_error = Some(e);

                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| {
            IngestError::Storage(format!("{} failed with no error captured", op_name))
        }))
    }
}

/// Randomized exponential backoff, capped at [`BACKOFF_MAX_MS`]
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_MIN_MS.saturating_mul(2u64.saturating_pow(attempt - 1));
    let cap = exp.min(BACKOFF_MAX_MS);
    let jittered = rand::thread_rng().gen_range(BACKOFF_MIN_MS..=cap.max(BACKOFF_MIN_MS));
    Duration::from_millis(jittered)
}

/// The AWS SDK buries status codes in error display text; the store treats
/// any not-found shape the same way
fn is_not_found(message: &str) -> bool {
    message.contains("NoSuchKey") || message.contains("NotFound") || message.contains("404")
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_retry("get", key, || async {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await;

            match response {
                Ok(output) => {
                    let data = output
                        .body
                        .collect()
                        .await
                        .map_err(|e| IngestError::Storage(format!("read body for '{}': {}", key, e)))?
                        .into_bytes()
                        .to_vec();
                    debug!(key = key, bytes = data.len(), "Downloaded object");
                    Ok(Some(data))
                },
                Err(e) => {
                    let message = format!("{}", aws_sdk_s3::error::DisplayErrorContext(&e));
                    if is_not_found(&message) {
                        Ok(None)
                    } else {
                        Err(IngestError::Storage(format!("get '{}': {}", key, message)))
                    }
                },
            }
        })
        .await
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<()> {
        self.with_retry("put", key, || {
            let data = data.clone();
            let content_type = content_type.clone();
            async move {
                let mut request = self
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(ByteStream::from(data));

                if let Some(ct) = content_type {
                    request = request.content_type(ct);
                }

                request.send().await.map_err(|e| {
                    IngestError::Storage(format!(
                        "put '{}': {}",
                        key,
                        aws_sdk_s3::error::DisplayErrorContext(&e)
                    ))
                })?;

                debug!(key = key, "Uploaded object");
                Ok(())
            }
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.with_retry("exists", key, || async {
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(e) => {
                    let message = format!("{}", aws_sdk_s3::error::DisplayErrorContext(&e));
                    if is_not_found(&message) {
                        Ok(false)
                    } else {
                        Err(IngestError::Storage(format!("head '{}': {}", key, message)))
                    }
                },
            }
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.with_retry("list", prefix, || async {
            let mut keys = Vec::new();
            let mut continuation: Option<String> = None;

            loop {
                let mut request = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix);

                if let Some(token) = &continuation {
                    request = request.continuation_token(token);
                }

                let response = request.send().await.map_err(|e| {
                    IngestError::Storage(format!(
                        "list '{}': {}",
                        prefix,
                        aws_sdk_s3::error::DisplayErrorContext(&e)
                    ))
                })?;

                keys.extend(
                    response
                        .contents()
                        .iter()
                        .filter_map(|obj| obj.key().map(|k| k.to_string())),
                );

                match response.next_continuation_token() {
                    Some(token) => continuation = Some(token.to_string()),
                    None => break,
                }
            }

            Ok(keys)
        })
        .await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        if !self.exists(from).await? {
            debug!(key = from, "Rename source does not exist");
            return Ok(false);
        }

        self.with_retry("rename", from, || async {
            let copy_source = format!("{}/{}", self.bucket, from);

            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(&copy_source)
                .key(to)
                .send()
                .await
                .map_err(|e| {
                    IngestError::Storage(format!(
                        "copy '{}' -> '{}': {}",
                        from,
                        to,
                        aws_sdk_s3::error::DisplayErrorContext(&e)
                    ))
                })?;

            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(from)
                .send()
                .await
                .map_err(|e| {
                    IngestError::Storage(format!(
                        "delete '{}': {}",
                        from,
                        aws_sdk_s3::error::DisplayErrorContext(&e)
                    ))
                })?;

            info!(from = from, to = to, "Object renamed");
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_within_bounds() {
        for attempt in 1..=MAX_ATTEMPTS {
            let delay = backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(BACKOFF_MIN_MS));
            assert!(delay <= Duration::from_millis(BACKOFF_MAX_MS));
        }
    }

    #[test]
    fn test_is_not_found() {
        assert!(is_not_found("service error: NoSuchKey"));
        assert!(is_not_found("NotFound"));
        assert!(is_not_found("http status: 404"));
        assert!(!is_not_found("throttled: SlowDown"));
    }
}
