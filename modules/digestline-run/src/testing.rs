// Test doubles for the selection run.
//
// - FlakyStore (all storage traits): MemoryStore with per-operation failure switches
// - FixedEmbedder (TextEmbedder): deterministic hash-based vectors
// - MockWriter (ContentWriter): builds articles from the input, with per-category failures
//
// Plus helpers for building raw items with controlled embeddings.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use digestline_common::{
    Embedding, Fingerprint, GeneratedArticle, NewContent, RawItem, RecentContent, TopicLock,
};

use crate::infra::memory::MemoryStore;
use crate::stats::RunSummary;
use crate::traits::{
    ContentStore, ContentWriter, RawItemStore, RunRecorder, TextEmbedder, TopicLockStore,
    WriterInput,
};

/// Standard embedding dimension for test vectors.
pub const TEST_EMBEDDING_DIM: usize = 16;

/// Fixed "now" shared by tests that need a stable clock.
pub fn test_now() -> DateTime<Utc> {
    "2026-03-15T12:00:00Z".parse().unwrap()
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// MemoryStore wrapper whose operations can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_loads: AtomicBool,
    fail_save_embedding: AtomicBool,
    fail_mark_consumed: AtomicBool,
    fail_inserts: AtomicBool,
    fail_recent_reads: AtomicBool,
    fail_lock_reads: AtomicBool,
    fail_lock_writes: AtomicBool,
    fail_record_run: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<RawItem>) -> Self {
        Self {
            inner: MemoryStore::with_items(items),
            ..Self::default()
        }
    }

    pub fn fail_loads(&self) {
        self.fail_loads.store(true, Ordering::SeqCst);
    }

    pub fn fail_save_embedding(&self) {
        self.fail_save_embedding.store(true, Ordering::SeqCst);
    }

    pub fn fail_mark_consumed(&self) {
        self.fail_mark_consumed.store(true, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    /// Fail the guard's reads: both the count and the recent listing.
    pub fn fail_recent_reads(&self) {
        self.fail_recent_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_lock_reads(&self) {
        self.fail_lock_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_lock_writes(&self) {
        self.fail_lock_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_record_run(&self) {
        self.fail_record_run.store(true, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            bail!("FlakyStore: {operation} switched to fail");
        }
        Ok(())
    }
}

#[async_trait]
impl RawItemStore for FlakyStore {
    async fn load_active(&self, now: DateTime<Utc>) -> Result<Vec<RawItem>> {
        Self::check(&self.fail_loads, "load_active")?;
        self.inner.load_active(now).await
    }

    async fn save_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<()> {
        Self::check(&self.fail_save_embedding, "save_embedding")?;
        self.inner.save_embedding(id, embedding).await
    }

    async fn mark_consumed(&self, ids: &[Uuid], content_id: Uuid) -> Result<()> {
        Self::check(&self.fail_mark_consumed, "mark_consumed")?;
        self.inner.mark_consumed(ids, content_id).await
    }
}

#[async_trait]
impl ContentStore for FlakyStore {
    async fn insert(&self, content: &NewContent) -> Result<Uuid> {
        Self::check(&self.fail_inserts, "insert")?;
        self.inner.insert(content).await
    }

    async fn count_since(&self, category: &str, since: DateTime<Utc>) -> Result<usize> {
        Self::check(&self.fail_recent_reads, "count_since")?;
        self.inner.count_since(category, since).await
    }

    async fn recent_in_category(
        &self,
        category: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RecentContent>> {
        Self::check(&self.fail_recent_reads, "recent_in_category")?;
        self.inner.recent_in_category(category, since, limit).await
    }
}

#[async_trait]
impl TopicLockStore for FlakyStore {
    async fn find_lock_since(
        &self,
        fingerprint: &Fingerprint,
        since: DateTime<Utc>,
    ) -> Result<Option<TopicLock>> {
        Self::check(&self.fail_lock_reads, "find_lock_since")?;
        self.inner.find_lock_since(fingerprint, since).await
    }

    async fn insert_lock(&self, lock: &TopicLock) -> Result<()> {
        Self::check(&self.fail_lock_writes, "insert_lock")?;
        self.inner.insert_lock(lock).await
    }
}

#[async_trait]
impl RunRecorder for FlakyStore {
    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        Self::check(&self.fail_record_run, "record_run")?;
        self.inner.record_run(summary).await
    }
}

// ---------------------------------------------------------------------------
// FixedEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder for testing. Registered texts get exact vectors;
/// unmatched texts get a unique hash-based vector (low similarity to everything).
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
    dimension: usize,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            failing: HashSet::new(),
            dimension,
        }
    }

    /// Register a text→vector mapping for controlled similarity.
    pub fn on_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Make embedding `text` fail. A batch containing it fails as a whole.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut vec = vec![0.0f32; self.dimension];
        for v in vec.iter_mut() {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *v = ((state >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }

    fn vector_for(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing.contains(text) {
            bail!("FixedEmbedder: embedding switched to fail for {text:?}");
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.hash_vector(text)))
    }
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.vector_for(text)
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.vector_for(t)).collect()
    }
}

// ---------------------------------------------------------------------------
// MockWriter
// ---------------------------------------------------------------------------

/// Writer that titles the article after the first member's first line.
/// Records every input it receives.
pub struct MockWriter {
    confidence: f64,
    titles: HashMap<String, String>,
    failing_categories: HashSet<String>,
    calls: Mutex<Vec<WriterInput>>,
}

impl MockWriter {
    pub fn new() -> Self {
        Self {
            confidence: 0.8,
            titles: HashMap::new(),
            failing_categories: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Fixed title for every article written in `category`.
    pub fn titling(mut self, category: &str, title: &str) -> Self {
        self.titles.insert(category.to_string(), title.to_string());
        self
    }

    pub fn failing_for(mut self, category: &str) -> Self {
        self.failing_categories.insert(category.to_string());
        self
    }

    pub fn calls(&self) -> Vec<WriterInput> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentWriter for MockWriter {
    async fn write(&self, input: &WriterInput) -> Result<GeneratedArticle> {
        self.calls.lock().unwrap().push(input.clone());
        if self.failing_categories.contains(&input.category) {
            bail!("MockWriter: writer switched to fail for {}", input.category);
        }
        let title = match self.titles.get(&input.category) {
            Some(t) => t.clone(),
            None => input
                .texts
                .first()
                .and_then(|t| t.lines().next())
                .unwrap_or("Untitled")
                .to_string(),
        };
        Ok(GeneratedArticle {
            title,
            body: input.texts.join("\n\n"),
            confidence: self.confidence,
            tags: vec![input.category.to_lowercase()],
        })
    }
}

// ---------------------------------------------------------------------------
// Item helpers
// ---------------------------------------------------------------------------

/// A live raw item with a title and an explicit embedding.
pub fn raw_item(title: &str, embedding: Option<Vec<f32>>) -> RawItem {
    RawItem {
        id: Uuid::new_v4(),
        title: Some(title.to_string()),
        content: format!("{title}. Full report follows."),
        embedding: Embedding::from(embedding),
        category_hint: None,
        source_url: Some(format!(
            "https://news.example.com/{}",
            title.to_lowercase().replace(' ', "-")
        )),
        published_at: test_now() - Duration::hours(2),
        expires_at: test_now() + Duration::days(3),
        consumed_by: None,
    }
}

/// Unit vector along `axis` in [`TEST_EMBEDDING_DIM`] dimensions.
pub fn axis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; TEST_EMBEDDING_DIM];
    v[axis % TEST_EMBEDDING_DIM] = 1.0;
    v
}

/// `axis(a)` nudged toward `axis(b)`: cosine to `axis(a)` stays above 0.99.
pub fn near_axis(a: usize, b: usize) -> Vec<f32> {
    let mut v = axis(a);
    v[b % TEST_EMBEDDING_DIM] = 0.1;
    v
}
