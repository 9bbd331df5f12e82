use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::Record;
use crate::vcard;

/// Who made a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum Actor {
    System,
    Reviewer(String),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::Reviewer(name) => write!(f, "reviewer:{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Fix,
    Match,
    Merge,
    Skip,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Fix => "fix",
            AuditAction::Match => "match",
            AuditAction::Merge => "merge",
            AuditAction::Skip => "skip",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fix" => Some(AuditAction::Fix),
            "match" => Some(AuditAction::Match),
            "merge" => Some(AuditAction::Merge),
            "skip" => Some(AuditAction::Skip),
            _ => None,
        }
    }
}

/// A record version frozen as vCard text, enough to restore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub record_id: String,
    pub source_id: String,
    pub version: u32,
    pub vcard: String,
}

impl RecordSnapshot {
    pub fn of(record: &Record) -> Self {
        Self {
            record_id: record.id().to_string(),
            source_id: record.source_id().to_string(),
            version: record.version(),
            vcard: vcard::write_record(record),
        }
    }
}

/// One immutable ledger line. `seq` is assigned by the ledger on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub subject_ids: Vec<String>,
    pub action: AuditAction,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub rationale: String,
}

impl AuditEntry {
    pub fn new(action: AuditAction, subject_ids: Vec<String>, rationale: impl Into<String>) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            actor: Actor::System,
            subject_ids,
            action,
            before: None,
            after: None,
            rationale: rationale.into(),
        }
    }

    pub fn by(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = Some(after);
        self
    }

    pub fn concerns(&self, subject: &str) -> bool {
        self.subject_ids.iter().any(|s| s == subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_as_snake_case() {
        let entry = AuditEntry::new(AuditAction::Skip, vec!["phone#3".to_string()], "missing END")
            .by(Actor::Reviewer("dana".to_string()));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "skip");
        assert_eq!(json["actor"]["kind"], "reviewer");
        assert_eq!(json["actor"]["name"], "dana");
        let back: AuditEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_action_names() {
        for action in [AuditAction::Fix, AuditAction::Match, AuditAction::Merge, AuditAction::Skip] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("delete"), None);
        assert_eq!(Actor::System.to_string(), "system");
    }
}
