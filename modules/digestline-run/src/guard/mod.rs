//! Composite duplicate guard run on each generated candidate before commit.
//!
//! Checks run cheapest first and stop at the first hit:
//! 1. category rate limit (a count query)
//! 2. lexical overlap of title keywords against recent same-category titles
//! 3. semantic similarity of the candidate embedding against recent
//!    same-category embeddings

pub mod keywords;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use digestline_common::config::GuardConfig;
use digestline_common::{ConflictingRecord, DuplicateVerdict, GuardCheck, RecentContent};
use digestline_select::cosine_similarity;

use crate::traits::ContentStore;

pub use keywords::{extract_keywords, jaccard, keyword_overlap, normalize_title};

/// The one semantic-duplicate threshold. Every caller of the guard uses it;
/// it is deliberately not a config knob.
pub const SEMANTIC_DUPLICATE_THRESHOLD: f64 = 0.90;

/// A generated candidate as seen by the guard.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub category: &'a str,
    pub title: &'a str,
    pub embedding: Option<&'a [f32]>,
}

/// Inclusive: reaching the maximum already counts as exceeded.
pub fn rate_limit_exceeded(count: usize, max: usize) -> bool {
    count >= max
}

pub struct DuplicateGuard {
    store: Arc<dyn ContentStore>,
    config: GuardConfig,
}

impl DuplicateGuard {
    pub fn new(store: Arc<dyn ContentStore>, config: GuardConfig) -> Self {
        Self { store, config }
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(self.config.rate_window_hours)
    }

    /// Check 1: how many items this category already committed in the window.
    pub async fn check_rate_limit(
        &self,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<DuplicateVerdict> {
        let since = self.window_start(now);
        let count = self.store.count_since(category, since).await?;
        let max = self.config.max_per_window;
        if !rate_limit_exceeded(count, max) {
            return Ok(DuplicateVerdict::unique());
        }

        let latest = self
            .store
            .recent_in_category(category, since, 1)
            .await
            .ok()
            .and_then(|mut recent| recent.drain(..).next())
            .map(|r| ConflictingRecord {
                content_id: r.id,
                title: r.title,
                score: 1.0,
            });

        Ok(DuplicateVerdict::duplicate(
            GuardCheck::RateLimit,
            format!(
                "category '{category}' rate limit reached: {count}/{max} in {}h",
                self.config.rate_window_hours
            ),
            latest,
        ))
    }

    /// Check 2: keyword Jaccard against recent titles. Reports the best match.
    /// A title equal to a recent one after normalization scores 1.0 even when
    /// it has no keywords.
    pub fn check_lexical(&self, title: &str, recent: &[RecentContent]) -> DuplicateVerdict {
        let normalized = normalize_title(title);
        if normalized.is_empty() {
            return DuplicateVerdict::unique();
        }
        let candidate = extract_keywords(title);

        let best = recent
            .iter()
            .map(|r| {
                let score = if normalize_title(&r.title) == normalized {
                    1.0
                } else {
                    jaccard(&candidate, &extract_keywords(&r.title))
                };
                (r, score)
            })
            .filter(|(_, score)| *score >= self.config.lexical_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((record, score)) => DuplicateVerdict::duplicate(
                GuardCheck::LexicalOverlap,
                format!("keyword overlap {score:.2} with '{}'", record.title),
                Some(ConflictingRecord {
                    content_id: record.id,
                    title: record.title.clone(),
                    score,
                }),
            ),
            None => DuplicateVerdict::unique(),
        }
    }

    /// Check 3: cosine similarity against recent embeddings.
    pub fn check_semantic(&self, embedding: &[f32], recent: &[RecentContent]) -> DuplicateVerdict {
        let best = recent
            .iter()
            .filter_map(|r| {
                let other = r.embedding.vector()?;
                match cosine_similarity(embedding, other) {
                    Ok(sim) => Some((r, sim)),
                    Err(e) => {
                        debug!(content_id = %r.id, error = %e, "Skipping incomparable embedding");
                        None
                    }
                }
            })
            .filter(|(_, sim)| *sim >= SEMANTIC_DUPLICATE_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((record, sim)) => DuplicateVerdict::duplicate(
                GuardCheck::SemanticSimilarity,
                format!("semantic similarity {sim:.3} with '{}'", record.title),
                Some(ConflictingRecord {
                    content_id: record.id,
                    title: record.title.clone(),
                    score: sim,
                }),
            ),
            None => DuplicateVerdict::unique(),
        }
    }

    /// Run all three checks, stopping at the first duplicate.
    pub async fn comprehensive_check(
        &self,
        candidate: Candidate<'_>,
        now: DateTime<Utc>,
    ) -> Result<DuplicateVerdict> {
        let rate = self.check_rate_limit(candidate.category, now).await?;
        if rate.is_duplicate {
            info!(category = candidate.category, reason = %rate.reason, "Duplicate guard: rate limit");
            return Ok(rate);
        }

        let recent = self
            .store
            .recent_in_category(candidate.category, self.window_start(now), self.config.recent_limit)
            .await?;
        if recent.is_empty() {
            return Ok(DuplicateVerdict::unique());
        }

        let lexical = self.check_lexical(candidate.title, &recent);
        if lexical.is_duplicate {
            info!(category = candidate.category, reason = %lexical.reason, "Duplicate guard: lexical");
            return Ok(lexical);
        }

        if let Some(embedding) = candidate.embedding {
            let semantic = self.check_semantic(embedding, &recent);
            if semantic.is_duplicate {
                info!(category = candidate.category, reason = %semantic.reason, "Duplicate guard: semantic");
                return Ok(semantic);
            }
        }

        Ok(DuplicateVerdict::unique())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryStore;
    use digestline_common::{Embedding, NewContent};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        "2026-03-15T12:00:00Z".parse().unwrap()
    }

    fn content(category: &str, title: &str, embedding: Option<Vec<f32>>, age_hours: i64) -> NewContent {
        NewContent {
            title: title.to_string(),
            body: String::new(),
            category: category.to_string(),
            tags: Vec::new(),
            source_item_ids: Vec::new(),
            embedding: embedding.into(),
            published: true,
            created_at: now() - Duration::hours(age_hours),
        }
    }

    async fn guard_with(records: Vec<NewContent>) -> DuplicateGuard {
        let store = Arc::new(MemoryStore::new());
        for r in &records {
            store.insert(r).await.unwrap();
        }
        DuplicateGuard::new(store, GuardConfig::default())
    }

    #[test]
    fn rate_limit_boundary_is_inclusive() {
        assert!(!rate_limit_exceeded(2, 3));
        assert!(rate_limit_exceeded(3, 3));
        assert!(rate_limit_exceeded(4, 3));
    }

    #[tokio::test]
    async fn full_category_is_rejected_with_count_in_reason() {
        let guard = guard_with(vec![
            content("BYD", "First story", None, 1),
            content("BYD", "Second story", None, 5),
            content("BYD", "Third story", None, 20),
        ])
        .await;
        let verdict = guard
            .comprehensive_check(
                Candidate {
                    category: "BYD",
                    title: "Completely unrelated headline",
                    embedding: None,
                },
                now(),
            )
            .await
            .unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.check, Some(GuardCheck::RateLimit));
        assert!(verdict.reason.contains("3/3"), "reason: {}", verdict.reason);
        assert_eq!(verdict.conflicting.unwrap().title, "First story");
    }

    #[tokio::test]
    async fn records_outside_window_do_not_count() {
        let guard = guard_with(vec![
            content("BYD", "Old one", None, 30),
            content("BYD", "Old two", None, 40),
            content("BYD", "Recent", None, 2),
        ])
        .await;
        let verdict = guard.check_rate_limit("BYD", now()).await.unwrap();
        assert!(!verdict.is_duplicate);
    }

    #[tokio::test]
    async fn other_categories_do_not_count() {
        let guard = guard_with(vec![
            content("Tesla", "One", None, 1),
            content("Tesla", "Two", None, 1),
            content("Tesla", "Three", None, 1),
        ])
        .await;
        assert!(!guard.check_rate_limit("BYD", now()).await.unwrap().is_duplicate);
    }

    #[tokio::test]
    async fn case_variant_title_is_lexical_duplicate() {
        let guard = guard_with(vec![content("Tesla", "Brand X Model Y price cut", None, 3)]).await;
        let verdict = guard
            .comprehensive_check(
                Candidate {
                    category: "Tesla",
                    title: "Brand X Model Y Price Cut",
                    embedding: None,
                },
                now(),
            )
            .await
            .unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.check, Some(GuardCheck::LexicalOverlap));
        let conflict = verdict.conflicting.unwrap();
        assert!((conflict.score - 1.0).abs() < 1e-9);
        assert_eq!(conflict.title, "Brand X Model Y price cut");
    }

    #[tokio::test]
    async fn keywordless_title_repeat_is_lexical_duplicate() {
        let guard = guard_with(vec![content("MG", "What Is It", None, 4)]).await;
        let recent = guard
            .store
            .recent_in_category("MG", now() - Duration::hours(24), 50)
            .await
            .unwrap();

        let verdict = guard.check_lexical("what is  it", &recent);
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.check, Some(GuardCheck::LexicalOverlap));
        assert_eq!(verdict.conflicting.unwrap().score, 1.0);

        assert!(!guard.check_lexical("What was it", &recent).is_duplicate);
        assert!(!guard.check_lexical("   ", &recent).is_duplicate);
    }

    #[tokio::test]
    async fn semantic_duplicate_caught_when_titles_differ() {
        let guard = guard_with(vec![content(
            "Toyota",
            "Hilux gets a hybrid drivetrain",
            Some(vec![1.0, 0.0, 0.0]),
            3,
        )])
        .await;
        let verdict = guard
            .comprehensive_check(
                Candidate {
                    category: "Toyota",
                    title: "Pickup buyers offered electrified option",
                    embedding: Some(&[0.98, 0.1, 0.0]),
                },
                now(),
            )
            .await
            .unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.check, Some(GuardCheck::SemanticSimilarity));
    }

    #[tokio::test]
    async fn below_semantic_threshold_is_unique() {
        let guard = guard_with(vec![content(
            "Toyota",
            "Hilux gets a hybrid drivetrain",
            Some(vec![1.0, 0.0, 0.0]),
            3,
        )])
        .await;
        let verdict = guard
            .comprehensive_check(
                Candidate {
                    category: "Toyota",
                    title: "Corolla sales record",
                    embedding: Some(&[0.8, 0.6, 0.0]),
                },
                now(),
            )
            .await
            .unwrap();
        assert!(!verdict.is_duplicate);
        assert_eq!(verdict, DuplicateVerdict::unique());
    }

    #[tokio::test]
    async fn rate_limit_short_circuits_later_checks() {
        let mut records: Vec<NewContent> = (0..3)
            .map(|i| content("MG", &format!("MG4 story {i}"), Some(vec![1.0, 0.0]), 1))
            .collect();
        records.push(content("MG", "MG4 price cut", Some(vec![1.0, 0.0]), 1));
        let guard = guard_with(records).await;
        let verdict = guard
            .comprehensive_check(
                Candidate {
                    category: "MG",
                    title: "MG4 price cut",
                    embedding: Some(&[1.0, 0.0]),
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(verdict.check, Some(GuardCheck::RateLimit));
    }

    #[test]
    fn semantic_check_skips_unresolved_and_mismatched() {
        let guard = DuplicateGuard::new(Arc::new(MemoryStore::new()), GuardConfig::default());
        let recent = vec![
            RecentContent {
                id: Uuid::new_v4(),
                title: "no vector".to_string(),
                category: "BMW".to_string(),
                embedding: Embedding::Unresolved,
                created_at: now(),
            },
            RecentContent {
                id: Uuid::new_v4(),
                title: "wrong length".to_string(),
                category: "BMW".to_string(),
                embedding: Embedding::Vector(vec![1.0, 0.0, 0.0]),
                created_at: now(),
            },
        ];
        assert!(!guard.check_semantic(&[1.0, 0.0], &recent).is_duplicate);
    }
}
