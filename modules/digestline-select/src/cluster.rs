//! Greedy single-link topic clustering.
//!
//! Category pools are small per run (tens of items), so the pairwise scan
//! is O(n²) per category. Not meant for global corpora.

use tracing::{debug, warn};

use digestline_common::{ClusterKind, RawItem, TopicCluster};

use crate::similarity::{cosine_similarity, mean_vector};

/// Nominal quality score reported for fallback digest clusters.
pub const DIGEST_NOMINAL_SIMILARITY: f64 = 0.5;

/// Thresholds applied when clustering one category.
#[derive(Debug, Clone, Copy)]
pub struct ClusterPolicy {
    pub min_size: usize,
    pub threshold: f64,
    /// Used instead of `threshold` (when stricter) for two-item categories.
    pub pair_threshold: f64,
}

/// Similarity between two items. Missing or mismatched embeddings never match.
fn item_similarity(a: &RawItem, b: &RawItem) -> f64 {
    let (Some(va), Some(vb)) = (a.embedding.vector(), b.embedding.vector()) else {
        return 0.0;
    };
    match cosine_similarity(va, vb) {
        Ok(sim) => sim,
        Err(e) => {
            warn!(a = %a.id, b = %b.id, error = %e, "Cannot compare items");
            0.0
        }
    }
}

fn build_cluster(category: &str, members: Vec<RawItem>, kind: ClusterKind) -> TopicCluster {
    let centroid = mean_vector(members.iter().filter_map(|m| m.embedding.vector()));
    let mean_similarity = match kind {
        ClusterKind::Digest => DIGEST_NOMINAL_SIMILARITY,
        _ => mean_pairwise_similarity(&members),
    };
    TopicCluster {
        category: category.to_string(),
        members,
        centroid,
        mean_similarity,
        kind,
    }
}

/// Mean similarity over all member pairs. A lone member scores 1.0.
pub fn mean_pairwise_similarity(members: &[RawItem]) -> f64 {
    if members.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            total += item_similarity(&members[i], &members[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Greedy single-link clustering in input order.
///
/// Each unassigned item seeds a new cluster and absorbs every later
/// unassigned item whose similarity to the seed is at least `threshold`.
/// Membership is tested against the seed only, never against other members.
/// Clusters with fewer than `min_size` members are dropped.
pub fn cluster(
    category: &str,
    items: &[RawItem],
    min_size: usize,
    threshold: f64,
) -> Vec<TopicCluster> {
    let mut assigned = vec![false; items.len()];
    let mut clusters = Vec::new();

    for seed in 0..items.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut members = vec![items[seed].clone()];

        for candidate in (seed + 1)..items.len() {
            if assigned[candidate] {
                continue;
            }
            if item_similarity(&items[seed], &items[candidate]) >= threshold {
                assigned[candidate] = true;
                members.push(items[candidate].clone());
            }
        }

        if members.len() >= min_size {
            clusters.push(build_cluster(category, members, ClusterKind::Similarity));
        }
    }

    clusters
}

/// Cluster one category, applying the degenerate-size policies:
///
/// - one item: wrapped as a singleton cluster regardless of `min_size`
/// - two items: the stricter of `threshold` and `pair_threshold`
/// - no clusters from two or more items: one digest cluster holding them all
///
/// Items are sorted by id first so membership does not depend on load order.
/// Output is largest cluster first.
pub fn cluster_category(
    category: &str,
    mut items: Vec<RawItem>,
    policy: ClusterPolicy,
) -> Vec<TopicCluster> {
    match items.len() {
        0 => return Vec::new(),
        1 => return vec![build_cluster(category, items, ClusterKind::Singleton)],
        _ => {}
    }

    items.sort_by_key(|item| item.id);

    let threshold = if items.len() == 2 {
        policy.threshold.max(policy.pair_threshold)
    } else {
        policy.threshold
    };

    let mut clusters = cluster(category, &items, policy.min_size, threshold);
    if clusters.is_empty() {
        debug!(
            category,
            items = items.len(),
            "No clusters formed, falling back to digest"
        );
        return vec![build_cluster(category, items, ClusterKind::Digest)];
    }

    clusters.sort_by(|a, b| b.member_count().cmp(&a.member_count()));
    clusters
}
