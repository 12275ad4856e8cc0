use serde::{Deserialize, Serialize};
use std::env;

/// Connection settings for one S3-compatible bucket.
///
/// The pipeline uses two stores: the pipeline bucket (stage records,
/// archive, run inputs/outputs) and the document bucket (cached content).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl StorageConfig {
    /// Build a config for the given bucket from the environment.
    ///
    /// Environment variables:
    /// - `S3_ENDPOINT`: optional custom endpoint (MinIO, localstack)
    /// - `S3_REGION`: region, defaults to `eu-west-1`
    /// - `S3_ACCESS_KEY` / `AWS_ACCESS_KEY_ID`
    /// - `S3_SECRET_KEY` / `AWS_SECRET_ACCESS_KEY`
    /// - `S3_PATH_STYLE`: force path-style addressing (true/false)
    pub fn from_env(bucket: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "eu-west-1".to_string()),
            bucket: bucket.into(),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .map_err(|_| anyhow::anyhow!("S3_ACCESS_KEY or AWS_ACCESS_KEY_ID must be set"))?,
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .map_err(|_| {
                    anyhow::anyhow!("S3_SECRET_KEY or AWS_SECRET_ACCESS_KEY must be set")
                })?,
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "eu-west-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}
