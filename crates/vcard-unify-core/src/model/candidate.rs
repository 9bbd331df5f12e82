use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::record::{RecordId, SourceId};
use crate::hasher;

/// Threshold bucket of a scored pair or of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    AutoMerge,
    NeedsReview,
    KeptSeparate,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::AutoMerge => "auto_merge",
            Bucket::NeedsReview => "needs_review",
            Bucket::KeptSeparate => "kept_separate",
        }
    }
}

/// A scored, unordered pair of records from different sources.
/// `left` is always the smaller record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub left: RecordId,
    pub right: RecordId,
    pub left_source: SourceId,
    pub right_source: SourceId,
    pub score: u8,
    pub factors: BTreeSet<String>,
    pub override_reason: Option<String>,
}

impl MatchCandidate {
    pub fn new(
        a: (&RecordId, &SourceId),
        b: (&RecordId, &SourceId),
        score: u8,
        factors: BTreeSet<String>,
        override_reason: Option<String>,
    ) -> Self {
        let ((left, left_source), (right, right_source)) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        Self {
            left: left.clone(),
            right: right.clone(),
            left_source: left_source.clone(),
            right_source: right_source.clone(),
            score,
            factors,
            override_reason,
        }
    }

    pub fn pair_key(&self) -> (&RecordId, &RecordId) {
        (&self.left, &self.right)
    }

    pub fn describe(&self) -> String {
        let factors = self.factors.iter().cloned().collect::<Vec<_>>().join(",");
        match &self.override_reason {
            Some(reason) => format!("score {} (override: {})", self.score, reason),
            None => format!("score {} [{}]", self.score, factors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    /// Derived from the sorted member ids, so it does not depend on discovery order.
    pub fn from_members(members: &[RecordId]) -> Self {
        let hash = hasher::fingerprint_strs(members.iter().map(|m| m.as_str()));
        Self(format!("G{:016x}", hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Records judged to be one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchGroup {
    pub id: GroupId,
    pub members: Vec<RecordId>,
    pub bucket: Bucket,
    pub edges: Vec<MatchCandidate>,
}

impl MatchGroup {
    pub fn new(mut members: Vec<RecordId>, bucket: Bucket, mut edges: Vec<MatchCandidate>) -> Self {
        members.sort();
        members.dedup();
        edges.sort_by(|a, b| a.pair_key().cmp(&b.pair_key()));
        Self {
            id: GroupId::from_members(&members),
            members,
            bucket,
            edges,
        }
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.members.binary_search(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A needs-review pair together with the groups its two sides already belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub candidate: MatchCandidate,
    pub left_group: Option<GroupId>,
    pub right_group: Option<GroupId>,
}
