//! DPI Ingest - intake and update stage of the document pipeline

use anyhow::{Context, Result};
use clap::Parser;
use dpi_common::logging::{init_logging, LogConfig};
use dpi_common::types::{Batch, ExecutionData};
use dpi_ingest::config::{
    UpdateConfig, DEFAULT_ARCHIVE_PREFIX, DEFAULT_EMBEDDINGS_INPUT_PREFIX,
    DEFAULT_INDEXER_INPUT_PREFIX, DEFAULT_PARSER_INPUT_PREFIX, DEFAULT_WORKER_COUNT,
};
use dpi_ingest::coordinator::Coordinator;
use dpi_ingest::download::{DownloadConfig, Downloader};
use dpi_ingest::intake::IntakeEngine;
use dpi_ingest::render::HttpRenderer;
use dpi_ingest::storage::config::StorageConfig;
use dpi_ingest::storage::{ObjectStore, S3Store};
use dpi_ingest::updates::PipelineCache;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dpi-ingest")]
#[command(author, version, about = "Document pipeline intake and update stage")]
struct Cli {
    /// Bucket holding the pipeline cache stages and batch inputs
    #[arg(long, env = "PIPELINE_BUCKET")]
    pipeline_bucket: String,

    /// Bucket holding cached canonical document content
    #[arg(long, env = "DOCUMENT_BUCKET")]
    document_bucket: String,

    /// Identifier of this pipeline execution; its pointer object names the
    /// input directory for the run
    #[arg(long, env = "EXECUTION_ID")]
    execution_id: String,

    /// Prefix of the per-execution pointer objects
    #[arg(long, env = "EXECUTION_DATA_PREFIX", default_value = "execution_data")]
    execution_data_prefix: String,

    /// Name of the batch descriptor file inside the run's input directory
    #[arg(long, env = "UPDATES_FILE_NAME", default_value = "db_state.json")]
    updates_file_name: String,

    /// Base URL of the render service
    #[arg(long, env = "RENDERER_ENDPOINT")]
    renderer_endpoint: String,

    /// Prefix of the parser input stage
    #[arg(long, default_value = DEFAULT_PARSER_INPUT_PREFIX)]
    output_prefix: String,

    /// Prefix of the embeddings input stage
    #[arg(long, default_value = DEFAULT_EMBEDDINGS_INPUT_PREFIX)]
    embeddings_input_prefix: String,

    /// Prefix of the indexer input stage
    #[arg(long, default_value = DEFAULT_INDEXER_INPUT_PREFIX)]
    indexer_input_prefix: String,

    /// Archive root prefix
    #[arg(long, default_value = DEFAULT_ARCHIVE_PREFIX)]
    archive_prefix: String,

    /// Number of concurrent worker tasks
    #[arg(long, default_value_t = DEFAULT_WORKER_COUNT)]
    worker_count: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::from_env()?;
    init_logging(&log_config)?;

    let pipeline_store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(
        StorageConfig::from_env(&cli.pipeline_bucket)?,
    ));
    let document_store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(
        StorageConfig::from_env(&cli.document_bucket)?,
    ));

    let updates_key = resolve_updates_key(&cli, pipeline_store.as_ref()).await?;
    let batch = read_batch(pipeline_store.as_ref(), &updates_key).await?;

    let intake = IntakeEngine::new(
        document_store,
        Downloader::new(DownloadConfig::default())?,
        Arc::new(HttpRenderer::new(&cli.renderer_endpoint)?),
    );
    let cache = PipelineCache::new(
        pipeline_store.clone(),
        UpdateConfig {
            parser_input: cli.output_prefix.clone(),
            embeddings_input: cli.embeddings_input_prefix.clone(),
            indexer_input: cli.indexer_input_prefix.clone(),
            archive_prefix: cli.archive_prefix.clone(),
        },
    );
    let coordinator = Coordinator::new(
        intake,
        cache,
        pipeline_store,
        cli.output_prefix.clone(),
        cli.worker_count,
    );

    let results = coordinator.run(batch, &updates_key).await?;

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        warn!(
            failed = failed,
            total = results.len(),
            "Batch run finished with per-document errors"
        );
    } else {
        info!(total = results.len(), "Batch run finished");
    }

    // per-document errors are reported, not fatal; only an unreadable
    // batch or an unwritable report fails the run
    Ok(())
}

/// Follow the execution pointer object to the run's batch descriptor key
async fn resolve_updates_key(cli: &Cli, store: &dyn ObjectStore) -> Result<String> {
    let pointer_key = format!("{}/{}.json", cli.execution_data_prefix, cli.execution_id);
    let data = store
        .get(&pointer_key)
        .await?
        .with_context(|| format!("Execution data '{}' does not exist", pointer_key))?;
    let execution_data: ExecutionData = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse execution data '{}'", pointer_key))?;

    let updates_key = format!(
        "{}/{}",
        execution_data.input_dir_path.trim_end_matches('/'),
        cli.updates_file_name
    );
    info!(
        execution_id = %cli.execution_id,
        updates_key = %updates_key,
        "Resolved batch input location"
    );
    Ok(updates_key)
}

/// Read and parse the batch descriptor; failure here is fatal to the run
async fn read_batch(store: &dyn ObjectStore, updates_key: &str) -> Result<Batch> {
    let data = store
        .get(updates_key)
        .await?
        .with_context(|| format!("Batch input '{}' does not exist", updates_key))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse batch input '{}'", updates_key))
}
