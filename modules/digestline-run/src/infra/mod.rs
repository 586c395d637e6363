pub mod embedder;
pub mod memory;
pub mod postgres;
pub mod writer;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use digestline_common::{Config, FileConfig};

use crate::orchestrator::RunDeps;
use crate::traits::TextEmbedder;

pub use embedder::{NoOpEmbedder, VoyageEmbedder};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use writer::{ClaudeWriter, EchoWriter};

/// Production collaborators: a migrated Postgres store, the Claude writer,
/// and Voyage embeddings when a key is configured.
pub async fn live_deps(env: &Config, file_config: &FileConfig) -> Result<RunDeps> {
    let store = Arc::new(PgStore::connect(&env.database_url).await?);
    store.migrate().await?;

    let anthropic_key = env
        .anthropic_api_key
        .as_deref()
        .context("ANTHROPIC_API_KEY is required for a live run")?;
    let writer = Arc::new(ClaudeWriter::new(anthropic_key, &file_config.models.writer));

    let embedder: Arc<dyn TextEmbedder> = match env.voyage_api_key.as_deref() {
        Some(key) => Arc::new(VoyageEmbedder::new(key, &file_config.models.embedding)),
        None => {
            warn!("VOYAGE_API_KEY not set, running without embeddings");
            Arc::new(NoOpEmbedder)
        }
    };

    Ok(RunDeps::with_store(store, embedder, writer))
}
