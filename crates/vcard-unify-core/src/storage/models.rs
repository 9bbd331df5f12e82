use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::model::MergedContact;

/// One invocation of the unify pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub sources: String,
    pub counts: RunCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub records_ingested: i64,
    pub records_skipped: i64,
    pub records_unfixable: i64,
    pub merged_contacts: i64,
    pub review_items: i64,
}

/// Everything one run writes, committed together or not at all.
#[derive(Debug, Clone, Copy)]
pub struct RunCommit<'a> {
    pub source_ids: &'a [String],
    pub contacts: &'a [MergedContact],
    pub review_items: &'a [ReviewQueueItem],
    pub audit_entries: &'a [AuditEntry],
    pub counts: &'a RunCounts,
}

/// A merged contact as committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContact {
    pub id: i64,
    pub run_id: i64,
    pub contact_id: String,
    pub display_name: String,
    pub source_ids: Vec<String>,
    pub record_ids: Vec<String>,
    pub vcard: String,
    pub conflict_count: i64,
}

/// Why an item sits in the manual review queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    /// A pair scored in the needs-review band.
    Match,
    /// An auto-merge chain above the group size cap.
    Group,
    /// A merged contact with conflicting critical fields.
    Conflict,
    /// A record the fixer could not make valid.
    Unfixable,
    /// A record whose id repeats within its source with different content.
    Duplicate,
}

impl ReviewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewKind::Match => "match",
            ReviewKind::Group => "group",
            ReviewKind::Conflict => "conflict",
            ReviewKind::Unfixable => "unfixable",
            ReviewKind::Duplicate => "duplicate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "match" => Some(ReviewKind::Match),
            "group" => Some(ReviewKind::Group),
            "conflict" => Some(ReviewKind::Conflict),
            "unfixable" => Some(ReviewKind::Unfixable),
            "duplicate" => Some(ReviewKind::Duplicate),
            _ => None,
        }
    }
}

/// An entry of the manual review queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewQueueItem {
    #[serde(skip)]
    pub id: i64,
    pub kind: ReviewKind,
    pub subject_ids: Vec<String>,
    pub score: Option<i64>,
    pub detail: String,
    pub status: String,
}

impl ReviewQueueItem {
    pub fn open(kind: ReviewKind, subject_ids: Vec<String>, score: Option<i64>, detail: String) -> Self {
        Self {
            id: 0,
            kind,
            subject_ids,
            score,
            detail,
            status: "open".to_string(),
        }
    }
}
