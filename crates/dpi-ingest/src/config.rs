//! Configuration for pipeline cache locations

use serde::{Deserialize, Serialize};

/// Default prefix holding parser input records.
pub const DEFAULT_PARSER_INPUT_PREFIX: &str = "parser_input";

/// Default prefix holding embeddings input records.
pub const DEFAULT_EMBEDDINGS_INPUT_PREFIX: &str = "embeddings_input";

/// Default prefix holding indexer input records and their sidecars.
pub const DEFAULT_INDEXER_INPUT_PREFIX: &str = "indexer_input";

/// Default archive root prefix.
pub const DEFAULT_ARCHIVE_PREFIX: &str = "archive";

/// Default number of concurrent worker tasks.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Shared configuration for the pipeline cache layout.
///
/// All prefixes are relative to the pipeline bucket root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Prefix of the parser input stage
    pub parser_input: String,

    /// Prefix of the embeddings input stage
    pub embeddings_input: String,

    /// Prefix of the indexer input stage
    pub indexer_input: String,

    /// Archive root; retired records go to `{archive}/{stage}/{id}/...`
    pub archive_prefix: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            parser_input: DEFAULT_PARSER_INPUT_PREFIX.to_string(),
            embeddings_input: DEFAULT_EMBEDDINGS_INPUT_PREFIX.to_string(),
            indexer_input: DEFAULT_INDEXER_INPUT_PREFIX.to_string(),
            archive_prefix: DEFAULT_ARCHIVE_PREFIX.to_string(),
        }
    }
}
