//! Postgres adapter for every storage trait.
//!
//! Embeddings live in text columns as JSON arrays; they are parsed once into
//! [`Embedding`] when rows are read.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use digestline_common::{Embedding, Fingerprint, NewContent, RawItem, RecentContent, TopicLock};

use crate::stats::RunSummary;
use crate::traits::{ContentStore, RawItemStore, RunRecorder, TopicLockStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }
}

fn raw_item_from_row(row: &PgRow) -> Result<RawItem> {
    let embedding: Option<String> = row.try_get("embedding")?;
    Ok(RawItem {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        embedding: Embedding::parse(embedding.as_deref()),
        category_hint: row.try_get("category_hint")?,
        source_url: row.try_get("source_url")?,
        published_at: row.try_get("published_at")?,
        expires_at: row.try_get("expires_at")?,
        consumed_by: row.try_get("consumed_by")?,
    })
}

#[async_trait]
impl RawItemStore for PgStore {
    async fn load_active(&self, now: DateTime<Utc>) -> Result<Vec<RawItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, content, embedding, category_hint, source_url,
                   published_at, expires_at, consumed_by
            FROM raw_items
            WHERE expires_at > $1 AND consumed_by IS NULL
            ORDER BY published_at DESC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(raw_item_from_row).collect()
    }

    async fn save_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<()> {
        let text = serde_json::to_string(embedding)?;
        sqlx::query("UPDATE raw_items SET embedding = $1 WHERE id = $2")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_consumed(&self, ids: &[Uuid], content_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE raw_items SET consumed_by = $1 WHERE id = ANY($2)")
            .bind(content_id)
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for PgStore {
    async fn insert(&self, content: &NewContent) -> Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO contents
                (id, title, body, category, tags, source_item_ids, embedding, published, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&content.title)
        .bind(&content.body)
        .bind(&content.category)
        .bind(&content.tags)
        .bind(&content.source_item_ids)
        .bind(content.embedding.to_text())
        .bind(content.published)
        .bind(content.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn count_since(&self, category: &str, since: DateTime<Utc>) -> Result<usize> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM contents WHERE category = $1 AND created_at >= $2",
        )
        .bind(category)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }

    async fn recent_in_category(
        &self,
        category: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RecentContent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, category, embedding, created_at
            FROM contents
            WHERE category = $1 AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(category)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let embedding: Option<String> = row.try_get("embedding")?;
                Ok(RecentContent {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    category: row.try_get("category")?,
                    embedding: Embedding::parse(embedding.as_deref()),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TopicLockStore for PgStore {
    async fn find_lock_since(
        &self,
        fingerprint: &Fingerprint,
        since: DateTime<Utc>,
    ) -> Result<Option<TopicLock>> {
        let row = sqlx::query(
            r#"
            SELECT fingerprint, created_at, content_id
            FROM topic_locks
            WHERE fingerprint = $1 AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(fingerprint.as_str())
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<TopicLock> {
            Ok(TopicLock {
                fingerprint: Fingerprint(r.try_get("fingerprint")?),
                created_at: r.try_get("created_at")?,
                content_id: r.try_get("content_id")?,
            })
        })
        .transpose()
    }

    async fn insert_lock(&self, lock: &TopicLock) -> Result<()> {
        sqlx::query(
            "INSERT INTO topic_locks (fingerprint, created_at, content_id) VALUES ($1, $2, $3)",
        )
        .bind(lock.fingerprint.as_str())
        .bind(lock.created_at)
        .bind(lock.content_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RunRecorder for PgStore {
    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        let mut stats = serde_json::to_value(summary)?;
        if let serde_json::Value::Object(map) = &mut stats {
            map.remove("events");
        }
        let events = serde_json::to_value(&summary.events)?;
        let status = serde_json::to_value(summary.status)?;

        sqlx::query(
            r#"
            INSERT INTO selection_runs (run_id, status, finished_at, stats, events)
            VALUES ($1, $2, now(), $3, $4)
            "#,
        )
        .bind(summary.run_id)
        .bind(status.as_str().unwrap_or("completed"))
        .bind(&stats)
        .bind(&events)
        .execute(&self.pool)
        .await?;

        info!(run_id = %summary.run_id, events = summary.events.len(), "Run log saved to Postgres");
        Ok(())
    }
}
