//! One selection run, end to end.
//!
//! Loads raw items, filters and embeds them, groups and clusters per
//! category, interleaves the clusters into a bounded work list, then walks
//! that list one item at a time under the budget supervisor. Each item is
//! lock-checked, written, duplicate-checked and committed. Any per-item
//! failure is logged and the loop moves on; only the initial load aborts.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use digestline_common::{Embedding, FileConfig, NewContent, RawItem, RunError, TopicCluster};
use digestline_select::{
    cluster_category, collect, sort_by_priority, CategoryCatalog, ClusterPolicy, DomainFilter,
};

use crate::budget::{BudgetSupervisor, Decision, RunBudget};
use crate::guard::{Candidate, DuplicateGuard};
use crate::lock_ledger::{fingerprint_variants, TopicLockLedger};
use crate::run_log::{EventKind, RunLog};
use crate::stats::RunSummary;
use crate::traits::{
    ContentStore, ContentWriter, RawItemStore, RunRecorder, TextEmbedder, TopicLockStore,
    WriterInput,
};

/// Collaborators for a run, constructed once at process start.
#[derive(Clone)]
pub struct RunDeps {
    pub raw_items: Arc<dyn RawItemStore>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub writer: Arc<dyn ContentWriter>,
    pub content: Arc<dyn ContentStore>,
    pub locks: Arc<dyn TopicLockStore>,
    pub recorder: Arc<dyn RunRecorder>,
}

impl RunDeps {
    /// Deps where one store backs every storage trait.
    pub fn with_store<S>(
        store: Arc<S>,
        embedder: Arc<dyn TextEmbedder>,
        writer: Arc<dyn ContentWriter>,
    ) -> Self
    where
        S: RawItemStore + ContentStore + TopicLockStore + RunRecorder + 'static,
    {
        Self {
            raw_items: store.clone(),
            embedder,
            writer,
            content: store.clone(),
            locks: store.clone(),
            recorder: store,
        }
    }
}

/// What happened to one work item.
enum Outcome {
    Committed { published: bool },
    Locked,
    Duplicate,
    GenerationFailed,
    CommitFailed,
}

pub struct Orchestrator {
    deps: RunDeps,
    config: FileConfig,
    catalog: CategoryCatalog,
    filter: DomainFilter,
    ledger: TopicLockLedger,
    guard: DuplicateGuard,
}

impl Orchestrator {
    pub fn new(deps: RunDeps, config: FileConfig) -> Self {
        let catalog = CategoryCatalog::new(&config.catalog());
        let filter = DomainFilter::new(&config.exclusion);
        let ledger = TopicLockLedger::new(deps.locks.clone());
        let guard = DuplicateGuard::new(deps.content.clone(), config.guard.clone());
        Self {
            deps,
            config,
            catalog,
            filter,
            ledger,
            guard,
        }
    }

    pub async fn run(&self) -> Result<RunSummary, RunError> {
        self.run_at(Utc::now()).await
    }

    /// Run with `now` as the clock for expiry, windows and timestamps.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunSummary, RunError> {
        let run_id = Uuid::new_v4();
        let mut log = RunLog::new(run_id);
        let mut summary = RunSummary::new(run_id);
        let mut budget = BudgetSupervisor::new(RunBudget::from_config(
            &self.config.selection,
            &self.config.budget,
        ));

        info!(%run_id, "Selection run starting");

        let items = self
            .deps
            .raw_items
            .load_active(now)
            .await
            .map_err(RunError::Fetch)?;
        summary.raw_items = items.len();
        log.log(EventKind::ItemsLoaded { count: items.len() });

        let (mut kept, excluded) = self.filter.apply(items, &self.catalog);
        summary.filtered_out = excluded.len();
        log.log(EventKind::DomainFiltered {
            kept: kept.len(),
            excluded: excluded.len(),
        });

        if self.config.selection.embed_items {
            self.fill_embeddings(&mut kept, &mut log).await;
        }

        let work = self.build_work_list(kept, now, &mut log, &mut summary);

        for cluster in &work {
            if let Decision::Stop(reason) = budget.decide() {
                info!(%reason, processed = budget.processed(), "Budget supervisor stopped the run");
                summary.limit_hit = Some(reason);
                log.log(EventKind::BudgetStop {
                    reason,
                    processed: budget.processed(),
                });
                break;
            }

            match self.process(cluster, now, &mut budget, &mut log).await {
                Outcome::Committed { published } => {
                    summary.generated += 1;
                    summary.committed += 1;
                    if published {
                        summary.published += 1;
                    }
                }
                Outcome::Locked => summary.skipped_locked += 1,
                Outcome::Duplicate => {
                    summary.generated += 1;
                    summary.rejected_duplicate += 1;
                }
                Outcome::GenerationFailed => summary.failed += 1,
                Outcome::CommitFailed => {
                    summary.generated += 1;
                    summary.failed += 1;
                }
            }
        }

        budget.log_status();
        summary.finish(budget.elapsed().as_millis() as u64);
        summary.events = log.into_events();

        if let Err(e) = self.deps.recorder.record_run(&summary).await {
            let err = RunError::SideEffect {
                operation: "record_run",
                source: e,
            };
            warn!(%run_id, error = %err, "Failed to record run");
        }

        info!(
            %run_id,
            committed = summary.committed,
            generated = summary.generated,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "Selection run complete"
        );
        Ok(summary)
    }

    /// Compute embeddings for items that lack one, in one batch with a
    /// per-item fallback. Computed vectors are written back best-effort.
    async fn fill_embeddings(&self, items: &mut [RawItem], log: &mut RunLog) {
        let missing: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.embedding.is_resolved())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return;
        }

        let texts: Vec<String> = missing.iter().map(|&i| items[i].embedding_text()).collect();
        let vectors: Vec<Option<Vec<f32>>> =
            match self.deps.embedder.embed_batch(texts.clone()).await {
                Ok(vectors) if vectors.len() == texts.len() => {
                    vectors.into_iter().map(Some).collect()
                }
                Ok(vectors) => {
                    warn!(
                        expected = texts.len(),
                        got = vectors.len(),
                        "Embedding batch size mismatch, embedding one at a time"
                    );
                    self.embed_each(&texts).await
                }
                Err(e) => {
                    warn!(error = %e, count = texts.len(), "Batch embedding failed, embedding one at a time");
                    self.embed_each(&texts).await
                }
            };

        let mut computed = 0;
        let mut failed = 0;
        for (&i, vector) in missing.iter().zip(vectors) {
            let Some(vector) = vector.filter(|v| !v.is_empty()) else {
                failed += 1;
                continue;
            };
            let item = &mut items[i];
            if let Err(e) = self.deps.raw_items.save_embedding(item.id, &vector).await {
                warn!(id = %item.id, error = %e, "Failed to write back embedding");
                log.log(EventKind::SideEffectFailed {
                    operation: "save_embedding".to_string(),
                    error: e.to_string(),
                });
            }
            item.embedding = Embedding::Vector(vector);
            computed += 1;
        }

        info!(computed, failed, "Embedding fill-in complete");
        log.log(EventKind::EmbeddingsFilled { computed, failed });
    }

    async fn embed_each(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            match self.deps.embedder.embed(text).await {
                Ok(v) => out.push(Some(v)),
                Err(e) => {
                    warn!(error = %e, "Embedding failed, item stays unresolved");
                    out.push(None);
                }
            }
        }
        out
    }

    /// Group, order, cluster and interleave into the run's work list.
    fn build_work_list(
        &self,
        items: Vec<RawItem>,
        now: DateTime<Utc>,
        log: &mut RunLog,
        summary: &mut RunSummary,
    ) -> Vec<TopicCluster> {
        let selection = &self.config.selection;
        let groups = sort_by_priority(
            self.catalog.group(items),
            &self.config.priority.categories,
            now.ordinal(),
        );

        let policy = ClusterPolicy {
            min_size: selection.min_cluster_size,
            threshold: selection.similarity_threshold,
            pair_threshold: selection.pair_threshold,
        };

        let per_category: Vec<(String, Vec<TopicCluster>)> = groups
            .into_iter()
            .map(|group| {
                let item_count = group.items.len();
                let clusters = cluster_category(&group.name, group.items, policy);
                debug!(
                    category = %group.name,
                    items = item_count,
                    clusters = clusters.len(),
                    "Category clustered"
                );
                summary.clusters += clusters.len();
                log.log(EventKind::ClustersFormed {
                    category: group.name.clone(),
                    items: item_count,
                    clusters: clusters.len(),
                });
                (group.name, clusters)
            })
            .collect();

        let collection = collect(per_category, selection.max_items, selection.per_category_cap);
        summary.work_items = collection.items.len();
        summary.rounds = collection.rounds;
        log.log(EventKind::WorkListCollected {
            items: collection.items.len(),
            rounds: collection.rounds,
        });
        collection.items
    }

    async fn process(
        &self,
        cluster: &TopicCluster,
        now: DateTime<Utc>,
        budget: &mut BudgetSupervisor,
        log: &mut RunLog,
    ) -> Outcome {
        let category = cluster.category.as_str();
        let cluster_size = cluster.member_count();
        let variants = fingerprint_variants(&cluster.centroid);
        let fp = variants.first();

        if let Some(fp) = fp {
            match self
                .ledger
                .check_any(&variants, self.config.locks.window_days, now)
                .await
            {
                Ok(Some(lock)) => {
                    debug!(category, fingerprint = lock.fingerprint.short(), locked_by = %lock.content_id, "Topic locked, skipping");
                    log.log(EventKind::TopicLocked {
                        category: category.to_string(),
                        fingerprint: lock.fingerprint.to_string(),
                        locked_by: lock.content_id,
                    });
                    return Outcome::Locked;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(category, fingerprint = fp.short(), error = %e, "Lock check failed, treating topic as unlocked");
                }
            }
        }

        let input = WriterInput {
            category: category.to_string(),
            texts: cluster.members.iter().map(|m| m.embedding_text()).collect(),
            source_urls: cluster
                .members
                .iter()
                .filter_map(|m| m.source_url.clone())
                .collect(),
        };

        let written = self.deps.writer.write(&input).await;
        budget.record_processed();
        let article = match written {
            Ok(article) => article,
            Err(source) => {
                let err = RunError::Generation {
                    category: category.to_string(),
                    source,
                };
                warn!(category, cluster_size, lead = cluster.lead_headline(), error = %err, "Skipping cluster");
                log.log(EventKind::GenerationFailed {
                    category: category.to_string(),
                    cluster_size,
                    error: err.to_string(),
                });
                return Outcome::GenerationFailed;
            }
        };

        let candidate_embedding = match self.deps.embedder.embed(&article.embedding_text()).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(e) => {
                warn!(category, title = %article.title, error = %e, "Candidate embedding failed, semantic check skipped");
                None
            }
        };

        let candidate = Candidate {
            category,
            title: &article.title,
            embedding: candidate_embedding.as_deref(),
        };
        match self.guard.comprehensive_check(candidate, now).await {
            Ok(verdict) if verdict.is_duplicate => {
                info!(category, title = %article.title, reason = %verdict.reason, "Rejected duplicate");
                log.log(EventKind::DuplicateRejected {
                    category: category.to_string(),
                    title: article.title.clone(),
                    check: verdict.check.map(|c| c.to_string()).unwrap_or_default(),
                    reason: verdict.reason,
                });
                return Outcome::Duplicate;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(category, title = %article.title, error = %e, "Duplicate guard unavailable, committing unchecked");
            }
        }

        let published = article.confidence >= self.config.selection.publish_confidence;
        let source_ids = cluster.member_ids();
        let content = NewContent {
            title: article.title.clone(),
            body: article.body,
            category: category.to_string(),
            tags: article.tags,
            source_item_ids: source_ids.clone(),
            embedding: Embedding::from(candidate_embedding),
            published,
            created_at: now,
        };

        let content_id = match self.deps.content.insert(&content).await {
            Ok(id) => id,
            Err(source) => {
                let err = RunError::Persistence {
                    category: category.to_string(),
                    source,
                };
                warn!(category, cluster_size, title = %content.title, error = %err, "Commit failed");
                log.log(EventKind::CommitFailed {
                    category: category.to_string(),
                    error: err.to_string(),
                });
                return Outcome::CommitFailed;
            }
        };

        info!(
            category,
            %content_id,
            title = %content.title,
            cluster_size,
            published,
            "Content committed"
        );
        log.log(EventKind::ContentCommitted {
            content_id,
            category: category.to_string(),
            title: content.title.clone(),
            confidence: article.confidence,
            published,
            sources: source_ids.len(),
        });

        if let Err(source) = self.deps.raw_items.mark_consumed(&source_ids, content_id).await {
            let err = RunError::SideEffect {
                operation: "mark_consumed",
                source,
            };
            warn!(category, %content_id, error = %err, "Source items not marked consumed");
            log.log(EventKind::SideEffectFailed {
                operation: "mark_consumed".to_string(),
                error: err.to_string(),
            });
        }

        if let Some(fp) = fp {
            if !self.ledger.create_lock(fp, content_id, now).await {
                log.log(EventKind::SideEffectFailed {
                    operation: "create_lock".to_string(),
                    error: format!("lock not recorded for {}", fp.short()),
                });
            }
        }

        Outcome::Committed { published }
    }
}
