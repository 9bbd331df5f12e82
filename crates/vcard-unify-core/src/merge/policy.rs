use std::cmp::Ordering;

use crate::model::{Property, RecordId, SourceId};

/// Source ranking used to break ties. Earlier sources win; unknown sources rank
/// after every configured one, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePriority {
    order: Vec<SourceId>,
}

impl SourcePriority {
    pub fn new<S: Into<String>>(order: impl IntoIterator<Item = S>) -> Self {
        Self {
            order: order.into_iter().map(|s| SourceId::new(s)).collect(),
        }
    }

    pub fn rank(&self, source: &SourceId) -> usize {
        self.order
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.order.len())
    }

    pub fn compare(&self, a: &SourceId, b: &SourceId) -> Ordering {
        self.rank(a).cmp(&self.rank(b)).then_with(|| a.cmp(b))
    }
}

/// One value offered for a single-valued field.
#[derive(Debug, Clone, Copy)]
pub struct FieldCandidate<'a> {
    /// Comparison key of the value.
    pub key: &'a str,
    pub text: &'a str,
    pub source: &'a SourceId,
    pub record: &'a RecordId,
    pub property: &'a Property,
}

/// Picks the winning value of a single-valued field (FN, ORG, TITLE, ...).
pub trait SelectionPolicy: Send + Sync {
    /// Index into `candidates` of the winner, `None` only when `candidates` is empty.
    fn select(
        &self,
        field: &str,
        candidates: &[FieldCandidate<'_>],
        priority: &SourcePriority,
    ) -> Option<usize>;
}

/// Longest normalized value, then source priority, then the value itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostCompletePolicy;

impl SelectionPolicy for MostCompletePolicy {
    fn select(
        &self,
        _field: &str,
        candidates: &[FieldCandidate<'_>],
        priority: &SourcePriority,
    ) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                b.key
                    .chars()
                    .count()
                    .cmp(&a.key.chars().count())
                    .then_with(|| priority.compare(a.source, b.source))
                    .then_with(|| a.text.cmp(b.text))
                    .then_with(|| a.record.cmp(b.record))
            })
            .map(|(i, _)| i)
    }
}

/// Highest priority source wins regardless of length.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityPolicy;

impl SelectionPolicy for PriorityPolicy {
    fn select(
        &self,
        _field: &str,
        candidates: &[FieldCandidate<'_>],
        priority: &SourcePriority,
    ) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                priority
                    .compare(a.source, b.source)
                    .then_with(|| a.text.cmp(b.text))
                    .then_with(|| a.record.cmp(b.record))
            })
            .map(|(i, _)| i)
    }
}
