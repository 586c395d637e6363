use std::collections::VecDeque;

use tracing::info;

use digestline_common::TopicCluster;

/// The ordered work list for one run.
#[derive(Debug, Default)]
pub struct Collection {
    pub items: Vec<TopicCluster>,
    /// Fully traversed rounds that took at least one cluster. Diagnostic only.
    pub rounds: usize,
}

/// Interleave per-category clusters into one work list.
///
/// Each round visits categories in the given order and takes the next
/// cluster from every category that is under `cap` and still has clusters.
/// Stops when `target` clusters are collected or no category is eligible.
/// Every category with work gets a first item before any gets a second, and
/// no category contributes more than `cap`. Falling short of `target` is a
/// normal outcome.
pub fn collect(
    per_category: Vec<(String, Vec<TopicCluster>)>,
    target: usize,
    cap: usize,
) -> Collection {
    let mut queues: Vec<(String, VecDeque<TopicCluster>, usize)> = per_category
        .into_iter()
        .map(|(name, clusters)| (name, VecDeque::from(clusters), 0))
        .collect();

    let mut out = Collection::default();
    if target == 0 || cap == 0 {
        return out;
    }

    'rounds: loop {
        let mut took_any = false;
        for (_, queue, taken) in queues.iter_mut() {
            if *taken >= cap {
                continue;
            }
            let Some(cluster) = queue.pop_front() else {
                continue;
            };
            out.items.push(cluster);
            *taken += 1;
            took_any = true;
            if out.items.len() >= target {
                break 'rounds;
            }
        }
        if !took_any {
            break;
        }
        out.rounds += 1;
    }

    info!(
        collected = out.items.len(),
        target,
        cap,
        rounds = out.rounds,
        categories = queues.iter().filter(|(_, _, taken)| *taken > 0).count(),
        "Round-robin collection complete"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use digestline_common::ClusterKind;

    fn clusters(category: &str, n: usize) -> (String, Vec<TopicCluster>) {
        let list = (0..n)
            .map(|_| TopicCluster {
                category: category.to_string(),
                members: Vec::new(),
                centroid: Vec::new(),
                mean_similarity: 1.0,
                kind: ClusterKind::Similarity,
            })
            .collect();
        (category.to_string(), list)
    }

    fn categories(c: &Collection) -> Vec<&str> {
        c.items.iter().map(|t| t.category.as_str()).collect()
    }

    #[test]
    fn interleaves_in_priority_order() {
        let c = collect(
            vec![clusters("A", 3), clusters("B", 3), clusters("C", 1)],
            10,
            2,
        );
        assert_eq!(categories(&c), vec!["A", "B", "C", "A", "B"]);
        assert_eq!(c.rounds, 2);
    }

    #[test]
    fn stops_at_target_mid_round() {
        let c = collect(vec![clusters("A", 5), clusters("B", 5), clusters("C", 5)], 4, 3);
        assert_eq!(categories(&c), vec!["A", "B", "C", "A"]);
        assert_eq!(c.rounds, 1);
    }

    #[test]
    fn every_category_gets_first_refusal() {
        let c = collect(
            vec![clusters("A", 9), clusters("B", 1), clusters("C", 1), clusters("D", 1)],
            4,
            5,
        );
        assert_eq!(categories(&c), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn under_fill_is_not_an_error() {
        let c = collect(vec![clusters("A", 1), clusters("B", 0)], 10, 3);
        assert_eq!(c.items.len(), 1);
        assert_eq!(c.rounds, 1);
    }

    #[test]
    fn zero_target_or_cap_yields_nothing() {
        assert!(collect(vec![clusters("A", 3)], 0, 2).items.is_empty());
        assert!(collect(vec![clusters("A", 3)], 5, 0).items.is_empty());
        assert!(collect(Vec::new(), 5, 2).items.is_empty());
    }

    #[test]
    fn never_exceeds_cap_per_category() {
        for target in 0..12 {
            for cap in 0..5 {
                let c = collect(
                    vec![clusters("A", 6), clusters("B", 2), clusters("C", 4)],
                    target,
                    cap,
                );
                let mut per: HashMap<&str, usize> = HashMap::new();
                for name in categories(&c) {
                    *per.entry(name).or_default() += 1;
                }
                assert!(per.values().all(|n| *n <= cap), "target={target} cap={cap}");
                assert!(c.items.len() <= target);
            }
        }
    }
}
