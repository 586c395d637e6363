// Trait abstractions for the run's external collaborators.
//
// RawItemStore  : the scraped item pool (read, embedding write-back, consumed marking)
// TextEmbedder  : text → vector
// ContentWriter : cluster → generated article
// ContentStore  : committed content (insert + recent reads for the duplicate guard)
// TopicLockStore: cross-run topic locks
// RunRecorder   : run log persistence
//
// Each is constructed once at process start and handed to the Orchestrator
// as Arc<dyn …>. Tests swap in the in-memory store and the mocks from
// `testing`: no network, no database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use digestline_common::{Fingerprint, GeneratedArticle, NewContent, RawItem, RecentContent, TopicLock};

use crate::stats::RunSummary;

#[async_trait]
pub trait RawItemStore: Send + Sync {
    /// Items not yet expired at `now` and not yet consumed.
    async fn load_active(&self, now: DateTime<Utc>) -> Result<Vec<RawItem>>;

    /// Write back a computed embedding.
    async fn save_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<()>;

    /// Mark source items as consumed by a committed content record.
    async fn mark_consumed(&self, ids: &[Uuid], content_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// What the writer receives for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterInput {
    pub category: String,
    pub texts: Vec<String>,
    pub source_urls: Vec<String>,
}

#[async_trait]
pub trait ContentWriter: Send + Sync {
    async fn write(&self, input: &WriterInput) -> Result<GeneratedArticle>;
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert a committed record, returning its id.
    async fn insert(&self, content: &NewContent) -> Result<Uuid>;

    /// Committed records in `category` created at or after `since`.
    async fn count_since(&self, category: &str, since: DateTime<Utc>) -> Result<usize>;

    /// Most recent records in `category` created at or after `since`, newest first.
    async fn recent_in_category(
        &self,
        category: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RecentContent>>;
}

#[async_trait]
pub trait TopicLockStore: Send + Sync {
    /// Newest lock for `fingerprint` created at or after `since`.
    async fn find_lock_since(
        &self,
        fingerprint: &Fingerprint,
        since: DateTime<Utc>,
    ) -> Result<Option<TopicLock>>;

    async fn insert_lock(&self, lock: &TopicLock) -> Result<()>;
}

#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn record_run(&self, summary: &RunSummary) -> Result<()>;
}
