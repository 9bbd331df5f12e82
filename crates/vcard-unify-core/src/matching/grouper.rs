use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::MatchingConfig;
use crate::model::{Bucket, GroupId, MatchCandidate, MatchGroup, RecordId, ReviewItem};

/// Result of bucketing and clustering one set of candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingOutcome {
    /// Groups committed for merging.
    pub auto_merge: Vec<MatchGroup>,
    /// Pairs a reviewer must decide, with the groups each side already belongs to.
    pub needs_review: Vec<ReviewItem>,
    pub kept_separate: Vec<MatchCandidate>,
    /// Auto-merge components too large to commit without review.
    pub review_groups: Vec<MatchGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grouper {
    auto_merge_threshold: u8,
    review_threshold: u8,
    max_group_size: usize,
}

impl Default for Grouper {
    fn default() -> Self {
        Self::new(&MatchingConfig::default())
    }
}

impl Grouper {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            auto_merge_threshold: config.auto_merge_threshold,
            review_threshold: config.review_threshold,
            max_group_size: config.max_group_size,
        }
    }

    pub fn bucket(&self, candidate: &MatchCandidate) -> Bucket {
        if candidate.override_reason.is_some() {
            Bucket::KeptSeparate
        } else if candidate.score >= self.auto_merge_threshold {
            Bucket::AutoMerge
        } else if candidate.score >= self.review_threshold {
            Bucket::NeedsReview
        } else {
            Bucket::KeptSeparate
        }
    }

    /// Cluster candidates into identity groups.
    ///
    /// 1. Sort candidates by id pair and bucket each one by score
    /// 2. Union-find over auto-merge edges only, in sorted order
    /// 3. Components above `max_group_size` become review groups
    /// 4. Needs-review edges become review items naming both sides' groups;
    ///    edges inside one auto group are already resolved and dropped
    pub fn group(&self, candidates: &[MatchCandidate]) -> GroupingOutcome {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| a.pair_key().cmp(&b.pair_key()));

        let mut auto_edges = Vec::new();
        let mut review_edges = Vec::new();
        let mut kept_separate = Vec::new();
        for candidate in sorted {
            match self.bucket(&candidate) {
                Bucket::AutoMerge => auto_edges.push(candidate),
                Bucket::NeedsReview => review_edges.push(candidate),
                Bucket::KeptSeparate => kept_separate.push(candidate),
            }
        }
        debug!(
            "Buckets: {} auto-merge, {} needs-review, {} kept-separate edges",
            auto_edges.len(),
            review_edges.len(),
            kept_separate.len()
        );

        // Index record ids in sorted order so roots are stable
        let mut index: BTreeMap<&RecordId, usize> = BTreeMap::new();
        for edge in &auto_edges {
            index.entry(&edge.left).or_insert(0);
            index.entry(&edge.right).or_insert(0);
        }
        let ids: Vec<RecordId> = index.keys().map(|id| (*id).clone()).collect();
        for (i, slot) in index.values_mut().enumerate() {
            *slot = i;
        }

        let mut sets = DisjointSets::new(ids.len());
        for edge in &auto_edges {
            sets.union(index[&edge.left], index[&edge.right]);
        }

        let mut components: BTreeMap<usize, (Vec<RecordId>, Vec<MatchCandidate>)> = BTreeMap::new();
        for (i, id) in ids.iter().enumerate() {
            components.entry(sets.find(i)).or_default().0.push(id.clone());
        }
        for edge in &auto_edges {
            let root = sets.find(index[&edge.left]);
            if let Some(component) = components.get_mut(&root) {
                component.1.push(edge.clone());
            }
        }

        let mut auto_merge = Vec::new();
        let mut review_groups = Vec::new();
        for (members, edges) in components.into_values() {
            if members.len() > self.max_group_size {
                warn!(
                    "Auto-merge chain of {} records exceeds max group size {}; routing to review",
                    members.len(),
                    self.max_group_size
                );
                review_groups.push(MatchGroup::new(members, Bucket::NeedsReview, edges));
            } else {
                auto_merge.push(MatchGroup::new(members, Bucket::AutoMerge, edges));
            }
        }

        let mut membership: BTreeMap<&RecordId, (&GroupId, bool)> = BTreeMap::new();
        for group in &auto_merge {
            for member in &group.members {
                membership.insert(member, (&group.id, true));
            }
        }
        for group in &review_groups {
            for member in &group.members {
                membership.insert(member, (&group.id, false));
            }
        }

        let mut needs_review = Vec::new();
        for group in &review_groups {
            for edge in &group.edges {
                needs_review.push(ReviewItem {
                    candidate: edge.clone(),
                    left_group: Some(group.id.clone()),
                    right_group: Some(group.id.clone()),
                });
            }
        }
        for edge in review_edges {
            let left = membership.get(&edge.left).copied();
            let right = membership.get(&edge.right).copied();
            if let (Some((l, true)), Some((r, true))) = (left, right) {
                if l == r {
                    continue;
                }
            }
            needs_review.push(ReviewItem {
                left_group: left.map(|(g, _)| g.clone()),
                right_group: right.map(|(g, _)| g.clone()),
                candidate: edge,
            });
        }
        needs_review.sort_by(|a, b| a.candidate.pair_key().cmp(&b.candidate.pair_key()));
        auto_merge.sort_by(|a, b| a.members.cmp(&b.members));
        review_groups.sort_by(|a, b| a.members.cmp(&b.members));

        info!(
            "Grouping: {} auto-merge groups, {} review items, {} review groups, {} kept separate",
            auto_merge.len(),
            needs_review.len(),
            review_groups.len(),
            kept_separate.len()
        );

        GroupingOutcome {
            auto_merge,
            needs_review,
            kept_separate,
            review_groups,
        }
    }
}

/// Group candidates under the default thresholds.
pub fn group(candidates: &[MatchCandidate]) -> GroupingOutcome {
    Grouper::default().group(candidates)
}

/// Union-find with path halving; the smaller index always becomes the root.
struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceId;
    use std::collections::BTreeSet;

    fn edge(a: &str, b: &str, score: u8) -> MatchCandidate {
        let (ida, idb) = (RecordId::new(a), RecordId::new(b));
        let (sa, sb) = (
            SourceId::new(a.split('/').next().unwrap()),
            SourceId::new(b.split('/').next().unwrap()),
        );
        MatchCandidate::new(
            (&ida, &sa),
            (&idb, &sb),
            score,
            BTreeSet::from(["test".to_string()]),
            None,
        )
    }

    #[test]
    fn test_threshold_boundaries() {
        let grouper = Grouper::default();
        assert_eq!(grouper.bucket(&edge("a/1", "b/1", 95)), Bucket::AutoMerge);
        assert_eq!(grouper.bucket(&edge("a/1", "b/1", 94)), Bucket::NeedsReview);
        assert_eq!(grouper.bucket(&edge("a/1", "b/1", 70)), Bucket::NeedsReview);
        assert_eq!(grouper.bucket(&edge("a/1", "b/1", 69)), Bucket::KeptSeparate);

        let mut overridden = edge("a/1", "b/1", 0);
        overridden.override_reason = Some("known distinct".to_string());
        assert_eq!(grouper.bucket(&overridden), Bucket::KeptSeparate);
    }

    #[test]
    fn test_transitive_auto_merge_forms_one_group() {
        let outcome = group(&[edge("a/1", "b/1", 95), edge("b/1", "c/1", 98), edge("d/1", "e/1", 50)]);
        assert_eq!(outcome.auto_merge.len(), 1);
        let g = &outcome.auto_merge[0];
        assert_eq!(
            g.members,
            vec![RecordId::new("a/1"), RecordId::new("b/1"), RecordId::new("c/1")]
        );
        assert_eq!(g.edges.len(), 2);
        assert_eq!(outcome.kept_separate.len(), 1);
        assert!(outcome.needs_review.is_empty());
    }

    #[test]
    fn test_review_edges_never_join_groups() {
        let outcome = group(&[
            edge("a/1", "b/1", 95),
            edge("b/1", "c/1", 80),
            edge("a/1", "b/1", 95),
            edge("a/1", "c/2", 75),
        ]);
        assert_eq!(outcome.auto_merge.len(), 1);
        assert_eq!(outcome.auto_merge[0].len(), 2);
        assert_eq!(outcome.needs_review.len(), 2);
        let gid = outcome.auto_merge[0].id.clone();
        for item in &outcome.needs_review {
            assert_eq!(item.left_group.as_ref(), Some(&gid));
            assert_eq!(item.right_group, None);
        }
    }

    #[test]
    fn test_review_edge_inside_group_is_dropped() {
        let outcome = group(&[
            edge("a/1", "b/1", 95),
            edge("b/1", "c/1", 96),
            edge("a/1", "c/1", 80),
        ]);
        assert_eq!(outcome.auto_merge.len(), 1);
        assert!(outcome.needs_review.is_empty());
    }

    #[test]
    fn test_oversized_chain_goes_to_review() {
        let mut config = MatchingConfig::default();
        config.max_group_size = 3;
        let chain: Vec<MatchCandidate> = (0..4)
            .map(|i| edge(&format!("s{}/x", i), &format!("s{}/x", i + 1), 99))
            .collect();
        let outcome = Grouper::new(&config).group(&chain);
        assert!(outcome.auto_merge.is_empty());
        assert_eq!(outcome.review_groups.len(), 1);
        assert_eq!(outcome.review_groups[0].len(), 5);
        assert_eq!(outcome.review_groups[0].bucket, Bucket::NeedsReview);
        assert_eq!(outcome.needs_review.len(), 4);
    }

    #[test]
    fn test_groups_partition_records() {
        let outcome = group(&[
            edge("a/1", "b/1", 95),
            edge("c/1", "d/1", 95),
            edge("b/1", "e/1", 99),
            edge("c/1", "f/1", 97),
        ]);
        let mut seen = BTreeSet::new();
        for g in &outcome.auto_merge {
            assert!(g.len() >= 2);
            for m in &g.members {
                assert!(seen.insert(m.clone()), "{m} in two groups");
            }
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_output_is_order_invariant() {
        let edges = vec![
            edge("a/1", "b/1", 95),
            edge("b/1", "c/1", 98),
            edge("c/1", "d/1", 72),
            edge("d/1", "e/1", 96),
            edge("e/1", "f/1", 10),
        ];
        let forward = group(&edges);
        let mut reversed = edges.clone();
        reversed.reverse();
        assert_eq!(forward, group(&reversed));
        let mut rotated = edges;
        rotated.rotate_left(2);
        assert_eq!(forward, group(&rotated));
    }
}
