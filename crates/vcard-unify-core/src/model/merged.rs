use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::record::{Record, RecordId, SourceId};

/// Which sources and records contributed one retained (normalized) value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueProvenance {
    pub value: String,
    pub sources: BTreeSet<SourceId>,
    pub records: BTreeSet<RecordId>,
}

/// A critical single-valued field that disagreed across the merged records.
/// The merge is still produced; the flag goes to the review queue.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("conflicting {field} values: {}", describe_values(.values))]
pub struct ConflictFlag {
    pub field: String,
    pub values: Vec<(SourceId, String)>,
    pub reason: String,
}

fn describe_values(values: &[(SourceId, String)]) -> String {
    values
        .iter()
        .map(|(source, value)| format!("{}={}", source, value))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedContact {
    pub id: String,
    pub record: Record,
    pub contributing_source_ids: BTreeSet<SourceId>,
    pub contributing_record_ids: Vec<RecordId>,
    pub field_provenance: BTreeMap<String, Vec<ValueProvenance>>,
    pub review_flags: Vec<ConflictFlag>,
}

impl MergedContact {
    pub fn has_conflicts(&self) -> bool {
        !self.review_flags.is_empty()
    }

    /// Normalized values retained for `field`, in provenance order.
    pub fn retained_values(&self, field: &str) -> Vec<&str> {
        self.field_provenance
            .get(field)
            .map(|values| values.iter().map(|v| v.value.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn display_name(&self) -> String {
        self.record.formatted_name().unwrap_or_default()
    }
}
