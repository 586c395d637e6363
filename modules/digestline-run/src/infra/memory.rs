//! In-process store backing dry runs and tests.
//!
//! Implements every storage trait over one mutex-guarded state so a test can
//! seed raw items, run the orchestrator, and inspect what was committed.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use digestline_common::{Embedding, Fingerprint, NewContent, RawItem, RecentContent, TopicLock};

use crate::stats::RunSummary;
use crate::traits::{ContentStore, RawItemStore, RunRecorder, TopicLockStore};

/// A committed record as held by [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct StoredContent {
    pub id: Uuid,
    pub content: NewContent,
}

#[derive(Default)]
struct State {
    items: Vec<RawItem>,
    contents: Vec<StoredContent>,
    locks: Vec<TopicLock>,
    runs: Vec<RunSummary>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<RawItem>) -> Self {
        let store = Self::new();
        store.state().items = items;
        store
    }

    /// Seed from a JSON array of raw items.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let items: Vec<RawItem> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))?;
        Ok(Self::with_items(items))
    }

    /// Add raw items, as the external collector would between runs.
    pub fn add_items(&self, items: Vec<RawItem>) {
        self.state().items.extend(items);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Every write is a single push or assignment; poisoned state is still valid.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn item(&self, id: Uuid) -> Option<RawItem> {
        self.state().items.iter().find(|i| i.id == id).cloned()
    }

    pub fn contents(&self) -> Vec<StoredContent> {
        self.state().contents.clone()
    }

    pub fn locks(&self) -> Vec<TopicLock> {
        self.state().locks.clone()
    }

    pub fn runs(&self) -> Vec<RunSummary> {
        self.state().runs.clone()
    }
}

#[async_trait]
impl RawItemStore for MemoryStore {
    async fn load_active(&self, now: DateTime<Utc>) -> Result<Vec<RawItem>> {
        Ok(self
            .state()
            .items
            .iter()
            .filter(|i| i.expires_at > now && i.consumed_by.is_none())
            .cloned()
            .collect())
    }

    async fn save_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<()> {
        let mut state = self.state();
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .with_context(|| format!("No raw item {id}"))?;
        item.embedding = Embedding::Vector(embedding.to_vec());
        Ok(())
    }

    async fn mark_consumed(&self, ids: &[Uuid], content_id: Uuid) -> Result<()> {
        let mut state = self.state();
        for item in state.items.iter_mut().filter(|i| ids.contains(&i.id)) {
            item.consumed_by = Some(content_id);
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn insert(&self, content: &NewContent) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.state().contents.push(StoredContent {
            id,
            content: content.clone(),
        });
        Ok(id)
    }

    async fn count_since(&self, category: &str, since: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .state()
            .contents
            .iter()
            .filter(|c| c.content.category == category && c.content.created_at >= since)
            .count())
    }

    async fn recent_in_category(
        &self,
        category: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RecentContent>> {
        let mut recent: Vec<RecentContent> = self
            .state()
            .contents
            .iter()
            .filter(|c| c.content.category == category && c.content.created_at >= since)
            .map(|c| RecentContent {
                id: c.id,
                title: c.content.title.clone(),
                category: c.content.category.clone(),
                embedding: c.content.embedding.clone(),
                created_at: c.content.created_at,
            })
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit);
        Ok(recent)
    }
}

#[async_trait]
impl TopicLockStore for MemoryStore {
    async fn find_lock_since(
        &self,
        fingerprint: &Fingerprint,
        since: DateTime<Utc>,
    ) -> Result<Option<TopicLock>> {
        Ok(self
            .state()
            .locks
            .iter()
            .filter(|l| &l.fingerprint == fingerprint && l.created_at >= since)
            .max_by_key(|l| l.created_at)
            .cloned())
    }

    async fn insert_lock(&self, lock: &TopicLock) -> Result<()> {
        self.state().locks.push(lock.clone());
        Ok(())
    }
}

#[async_trait]
impl RunRecorder for MemoryStore {
    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        self.state().runs.push(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        "2026-03-15T12:00:00Z".parse().unwrap()
    }

    fn item(content: &str, expires_in_hours: i64) -> RawItem {
        RawItem {
            id: Uuid::new_v4(),
            title: None,
            content: content.to_string(),
            embedding: Embedding::Unresolved,
            category_hint: None,
            source_url: None,
            published_at: now() - Duration::hours(1),
            expires_at: now() + Duration::hours(expires_in_hours),
            consumed_by: None,
        }
    }

    #[tokio::test]
    async fn load_active_skips_expired_and_consumed() {
        let live = item("live", 5);
        let expired = item("expired", -1);
        let consumed = item("consumed", 5);
        let store = MemoryStore::with_items(vec![live.clone(), expired, consumed.clone()]);
        store.mark_consumed(&[consumed.id], Uuid::new_v4()).await.unwrap();

        let active = store.load_active(now()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);
    }

    #[tokio::test]
    async fn save_embedding_resolves_the_item() {
        let raw = item("text", 5);
        let store = MemoryStore::with_items(vec![raw.clone()]);
        store.save_embedding(raw.id, &[0.5, 0.5]).await.unwrap();
        assert_eq!(store.item(raw.id).unwrap().embedding.vector(), Some(&[0.5f32, 0.5][..]));
        assert!(store.save_embedding(Uuid::new_v4(), &[1.0]).await.is_err());
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        for (i, age) in [5i64, 1, 3].iter().enumerate() {
            store
                .insert(&NewContent {
                    title: format!("t{i}"),
                    body: String::new(),
                    category: "BYD".to_string(),
                    tags: Vec::new(),
                    source_item_ids: Vec::new(),
                    embedding: Embedding::Unresolved,
                    published: true,
                    created_at: now() - Duration::hours(*age),
                })
                .await
                .unwrap();
        }
        let recent = store
            .recent_in_category("BYD", now() - Duration::hours(24), 2)
            .await
            .unwrap();
        let titles: Vec<&str> = recent.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["t1", "t2"]);
    }
}
