use ahash::AHashSet;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

use super::policy::{FieldCandidate, MostCompletePolicy, PriorityPolicy, SelectionPolicy, SourcePriority};
use crate::config::{MergeConfig, SelectionPolicyKind};
use crate::error::Error;
use crate::model::{
    ConflictFlag, FieldKind, GroupId, MergedContact, Property, Record, RecordId,
    SourceId, ValueProvenance,
};
use crate::normalize::{self, DEFAULT_COUNTRY_CODE};

/// Single-valued fields resolved through the selection policy.
const SELECTIVE_FIELDS: &[&str] = &["FN", "ORG", "TITLE", "UID"];
/// Fields whose every input value must survive the merge.
const CONSERVED_FIELDS: &[&str] = &["EMAIL", "TEL", "URL", "ADR"];
/// Regenerated on export.
const SKIPPED_FIELDS: &[&str] = &["VERSION", "PRODID", "REV"];

pub const ALTERNATE_PREFIX: &str = "X-ALTERNATE-";
pub const CONFLICT_BDAY: &str = "X-CONFLICT-BDAY";
pub const SOURCE_PARAM: &str = "X-SOURCE";

/// Folds one identity group into a single contact.
pub struct MergeResolver {
    priority: SourcePriority,
    labels: BTreeMap<SourceId, String>,
    policy: Box<dyn SelectionPolicy>,
    config: MergeConfig,
    default_country_code: String,
}

impl Default for MergeResolver {
    fn default() -> Self {
        Self::new(SourcePriority::default(), &MergeConfig::default(), DEFAULT_COUNTRY_CODE)
    }
}

impl MergeResolver {
    pub fn new(priority: SourcePriority, config: &MergeConfig, default_country_code: &str) -> Self {
        let policy: Box<dyn SelectionPolicy> = match config.selection_policy {
            SelectionPolicyKind::MostComplete => Box::new(MostCompletePolicy),
            SelectionPolicyKind::Priority => Box::new(PriorityPolicy),
        };
        Self {
            priority,
            labels: BTreeMap::new(),
            policy,
            config: config.clone(),
            default_country_code: default_country_code.to_string(),
        }
    }

    /// Display labels used in merged note prefixes. Sources without one use their id.
    pub fn with_labels(mut self, labels: BTreeMap<SourceId, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Merge the records of one group. A single record passes through unchanged
    /// apart from its identity.
    pub fn merge(&self, records: &[Record]) -> Result<MergedContact, Error> {
        if records.is_empty() {
            return Err(Error::Other("cannot merge an empty group".to_string()));
        }
        let mut ordered: Vec<&Record> = records.iter().collect();
        ordered.sort_by(|a, b| {
            self.priority
                .compare(a.source_id(), b.source_id())
                .then_with(|| a.id().cmp(b.id()))
        });
        ordered.dedup_by(|a, b| a.id() == b.id());

        let mut record_ids: Vec<RecordId> = ordered.iter().map(|r| r.id().clone()).collect();
        record_ids.sort();
        let contact_id = GroupId::from_members(&record_ids).to_string();
        let sources: BTreeSet<SourceId> = ordered.iter().map(|r| r.source_id().clone()).collect();
        let imported_at = ordered
            .iter()
            .map(|r| r.import_timestamp())
            .max()
            .unwrap_or_else(Utc::now);

        let mut state = MergeState::default();
        let properties = if ordered.len() == 1 {
            for property in ordered[0].properties() {
                if let Some(key) = self.value_key(property) {
                    state.note_provenance(property, key, ordered[0]);
                }
            }
            ordered[0].properties().to_vec()
        } else {
            self.merge_properties(&ordered, &mut state)
        };

        let record = Record::new(
            RecordId::for_source(&SourceId::merged(), &contact_id),
            SourceId::merged(),
            imported_at,
            properties,
        );
        let contact = MergedContact {
            id: contact_id,
            record,
            contributing_source_ids: sources,
            contributing_record_ids: record_ids,
            field_provenance: state.provenance,
            review_flags: state.flags,
        };

        self.check_conservation(&ordered, &contact)?;
        if contact.has_conflicts() {
            debug!(
                "Merged {} with {} conflict(s): {}",
                contact.id,
                contact.review_flags.len(),
                contact
                    .review_flags
                    .iter()
                    .map(|f| f.field.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(contact)
    }

    fn merge_properties(&self, ordered: &[&Record], state: &mut MergeState) -> Vec<Property> {
        let mut properties = vec![Property::new("VERSION", crate::compliance::DEFAULT_VERSION)];

        for &field in SELECTIVE_FIELDS {
            let winner = self.select_field(field, ordered, state, &mut properties);
            if field == "FN" {
                self.resolve_structured_name(winner, ordered, state, &mut properties);
            }
        }

        self.resolve_birthday(ordered, state, &mut properties);

        // Additive: first representative by priority, TYPE params unioned.
        let mut kept: BTreeMap<(String, String), usize> = BTreeMap::new();
        for (index, record) in ordered.iter().enumerate() {
            for property in record.properties() {
                if !is_additive(property) {
                    continue;
                }
                let Some(key) = self.value_key(property) else {
                    continue;
                };
                state.note_provenance(property, key.clone(), record);
                match kept.get(&(property.name.clone(), key.clone())) {
                    Some(&at) => {
                        for value in property.type_values() {
                            properties[at].add_param_value("TYPE", &value);
                        }
                    }
                    None => {
                        let mut copy = property.clone();
                        if index > 0 {
                            copy.group = copy.group.map(|g| format!("s{}-{}", index, g));
                        }
                        kept.insert((property.name.clone(), key), properties.len());
                        properties.push(copy);
                    }
                }
            }
        }

        if let Some(note) = self.merge_notes(ordered) {
            properties.push(Property::text("NOTE", &note));
        }
        properties
    }

    /// Choose one value for `field`; losing distinct values become alternates.
    /// Returns the record the winner came from.
    fn select_field<'r>(
        &self,
        field: &str,
        ordered: &[&'r Record],
        state: &mut MergeState,
        properties: &mut Vec<Property>,
    ) -> Option<&'r Record> {
        let mut offered: Vec<(String, String, &'r Record, &'r Property)> = Vec::new();
        for &record in ordered {
            for property in record.named(field) {
                if let Some(key) = self.value_key(property) {
                    offered.push((key, display_text(property), record, property));
                }
            }
        }
        if offered.is_empty() {
            return None;
        }
        for (key, _, record, property) in &offered {
            state.note_provenance(property, key.clone(), record);
        }

        let candidates: Vec<FieldCandidate<'_>> = offered
            .iter()
            .map(|(key, text, record, property)| FieldCandidate {
                key,
                text,
                source: record.source_id(),
                record: record.id(),
                property,
            })
            .collect();
        let winner = self.policy.select(field, &candidates, &self.priority)?;
        let (winning_key, _, winning_record, winning_property) = &offered[winner];
        properties.push((*winning_property).clone());

        let mut seen: AHashSet<&str> = AHashSet::new();
        seen.insert(winning_key);
        let mut distinct: Vec<(SourceId, String)> = vec![(
            winning_record.source_id().clone(),
            display_text(winning_property),
        )];
        for (key, text, record, _) in &offered {
            if seen.insert(key) {
                properties.push(alternate_property(field, record.source_id(), text));
                distinct.push((record.source_id().clone(), text.clone()));
            }
        }

        if distinct.len() > 1 && field != "UID" && self.config.is_critical(field) {
            trace!("Conflict on {}: {:?}", field, distinct);
            state.flags.push(ConflictFlag {
                field: field.to_string(),
                values: distinct,
                reason: format!("contributing records disagree on {}", field),
            });
        }
        Some(*winning_record)
    }

    /// N follows the FN winner. Other distinct structured names are kept as
    /// `X-ALTERNATE-N` with their components intact.
    fn resolve_structured_name(
        &self,
        winner: Option<&Record>,
        ordered: &[&Record],
        state: &mut MergeState,
        properties: &mut Vec<Property>,
    ) {
        let mut offered: Vec<(String, &Record, &Property)> = Vec::new();
        for &record in ordered {
            for property in record.of_kind(FieldKind::StructuredName) {
                if let Some(key) = structured_name_key(property) {
                    offered.push((key, record, property));
                }
            }
        }
        let chosen = winner
            .and_then(|w| offered.iter().position(|(_, record, _)| record.id() == w.id()))
            .or_else(|| (!offered.is_empty()).then_some(0));
        let Some(chosen) = chosen else {
            return;
        };
        for (key, record, property) in &offered {
            state.note_provenance(property, key.clone(), record);
        }

        let (winning_key, _, winning_property) = &offered[chosen];
        properties.push((*winning_property).clone());
        let mut seen: AHashSet<&str> = AHashSet::new();
        seen.insert(winning_key);
        for (key, record, property) in &offered {
            if seen.insert(key) {
                properties.push(
                    Property::new(&format!("{}N", ALTERNATE_PREFIX), property.value.clone())
                        .with_param(SOURCE_PARAM, record.source_id().as_str()),
                );
            }
        }
    }

    /// Birthdays within the tolerance agree: the highest priority value is kept
    /// and other distinct values become alternates. Otherwise, for a critical
    /// BDAY, every value is kept as a conflict property.
    fn resolve_birthday(&self, ordered: &[&Record], state: &mut MergeState, properties: &mut Vec<Property>) {
        let values: Vec<(&Record, &Property)> = ordered
            .iter()
            .flat_map(|record| record.of_kind(FieldKind::Birthday).map(move |p| (*record, p)))
            .filter(|(_, p)| !p.text_value().trim().is_empty())
            .collect();
        let Some(&(_, first)) = values.first() else {
            return;
        };
        for (record, property) in &values {
            state.note_provenance(property, property.text_value().trim().to_string(), record);
        }

        let tolerance = self.config.birthday_tolerance_days;
        let agree = values.iter().all(|(_, p)| {
            birthdays_agree(&first.text_value(), &p.text_value(), tolerance)
        });
        if agree || !self.config.is_critical("BDAY") {
            properties.push(first.clone());
            let mut seen: AHashSet<String> = AHashSet::new();
            seen.insert(first.text_value().trim().to_string());
            for (record, property) in &values {
                let text = property.text_value().trim().to_string();
                if seen.insert(text.clone()) {
                    properties.push(alternate_property("BDAY", record.source_id(), &text));
                }
            }
            return;
        }

        let mut conflicting: Vec<(SourceId, String)> = Vec::new();
        for (record, property) in &values {
            let entry = (record.source_id().clone(), property.text_value().trim().to_string());
            if conflicting.contains(&entry) {
                continue;
            }
            properties.push(
                Property::text(CONFLICT_BDAY, &entry.1).with_param(SOURCE_PARAM, entry.0.as_str()),
            );
            conflicting.push(entry);
        }
        state.flags.push(ConflictFlag {
            field: "BDAY".to_string(),
            values: conflicting,
            reason: format!("birthdays differ by more than {} day(s)", tolerance),
        });
    }

    /// All non-empty notes, each prefixed with `[<source label> <import time>]`.
    /// Lines already emitted by an earlier note are dropped.
    fn merge_notes(&self, ordered: &[&Record]) -> Option<String> {
        let mut seen_lines: AHashSet<String> = AHashSet::new();
        let mut entries = Vec::new();
        for record in ordered {
            for note in record.notes() {
                let lines: Vec<&str> = note
                    .lines()
                    .filter(|line| seen_lines.insert(line.to_string()))
                    .collect();
                if lines.iter().all(|l| l.trim().is_empty()) {
                    continue;
                }
                entries.push(format!(
                    "[{} {}] {}",
                    self.label(record.source_id()),
                    timestamp(record.import_timestamp()),
                    lines.join("\n")
                ));
            }
        }
        (!entries.is_empty()).then(|| entries.join("\n"))
    }

    fn label<'a>(&'a self, source: &'a SourceId) -> &'a str {
        self.labels
            .get(source)
            .map(String::as_str)
            .unwrap_or(source.as_str())
    }

    /// Normalized comparison key for a property value, `None` for empty values.
    fn value_key(&self, property: &Property) -> Option<String> {
        let text = property.text_value();
        let text = text.trim();
        if text.is_empty() && property.kind() != FieldKind::Address {
            return None;
        }
        let key = match property.kind() {
            FieldKind::Email => normalize::normalize_email(text).unwrap_or_else(|_| text.to_lowercase()),
            FieldKind::Phone => normalize::normalize_phone_with(text, &self.default_country_code)
                .map(|p| p.canonical)
                .unwrap_or_else(|_| text.to_string()),
            FieldKind::Address => {
                let parts: Vec<String> = property
                    .components()
                    .iter()
                    .map(|c| normalize::name_key(c))
                    .collect();
                if parts.iter().all(String::is_empty) {
                    return None;
                }
                parts.join(";")
            }
            FieldKind::Url => text.trim_end_matches('/').to_lowercase(),
            FieldKind::FormattedName => normalize::name_key(text),
            FieldKind::Organization => {
                let org = normalize::normalize_org(text);
                if org.is_empty() {
                    return None;
                }
                org
            }
            FieldKind::Title => normalize::name_key(text),
            FieldKind::Photo => property.value.trim().to_string(),
            _ => text.to_string(),
        };
        Some(key)
    }

    fn check_conservation(&self, ordered: &[&Record], contact: &MergedContact) -> Result<(), Error> {
        for &field in CONSERVED_FIELDS {
            let retained: AHashSet<String> = contact
                .record
                .named(field)
                .filter_map(|p| self.value_key(p))
                .collect();
            for record in ordered {
                for property in record.named(field) {
                    if let Some(key) = self.value_key(property) {
                        if !retained.contains(&key) {
                            return Err(Error::ConservationViolated {
                                group_id: contact.id.clone(),
                                field: field.to_string(),
                                value: key,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct MergeState {
    provenance: BTreeMap<String, Vec<ValueProvenance>>,
    flags: Vec<ConflictFlag>,
}

impl MergeState {
    fn note_provenance(&mut self, property: &Property, key: String, record: &Record) {
        let values = self.provenance.entry(property.name.clone()).or_default();
        let entry = match values.iter().position(|v| v.value == key) {
            Some(i) => &mut values[i],
            None => {
                values.push(ValueProvenance {
                    value: key,
                    sources: BTreeSet::new(),
                    records: BTreeSet::new(),
                });
                let last = values.len() - 1;
                &mut values[last]
            }
        };
        entry.sources.insert(record.source_id().clone());
        entry.records.insert(record.id().clone());
    }
}

fn is_additive(property: &Property) -> bool {
    let name = property.name.as_str();
    !SELECTIVE_FIELDS.contains(&name)
        && !SKIPPED_FIELDS.contains(&name)
        && !matches!(
            property.kind(),
            FieldKind::StructuredName | FieldKind::Note | FieldKind::Birthday
        )
}

/// Components compared ignoring case and punctuation; `None` when every component is empty.
fn structured_name_key(property: &Property) -> Option<String> {
    let parts: Vec<String> = property
        .components()
        .iter()
        .map(|c| normalize::name_key(c))
        .collect();
    if parts.iter().all(String::is_empty) {
        return None;
    }
    Some(parts.join(";"))
}

fn display_text(property: &Property) -> String {
    match property.kind() {
        FieldKind::Organization => property
            .components()
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(";"),
        _ => property.text_value().trim().to_string(),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn parse_birthday(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date = raw.split('T').next().unwrap_or(raw);
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%Y%m%d"))
        .ok()
}

fn birthdays_agree(a: &str, b: &str, tolerance_days: i64) -> bool {
    match (parse_birthday(a), parse_birthday(b)) {
        (Some(x), Some(y)) => (x - y).num_days().abs() <= tolerance_days,
        _ => a.trim() == b.trim(),
    }
}

/// Merge with the default resolver.
pub fn merge(records: &[Record]) -> Result<MergedContact, Error> {
    MergeResolver::default().merge(records)
}

/// `X-ALTERNATE-<field>` carrying a losing value and the source it came from.
pub fn alternate_property(field: &str, source: &SourceId, text: &str) -> Property {
    Property::text(&format!("{}{}", ALTERNATE_PREFIX, field), text)
        .with_param(SOURCE_PARAM, source.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcard::ingest;

    fn record(source: &str, body: &str) -> Record {
        ingest(
            &format!("BEGIN:VCARD\nVERSION:3.0\n{}\nEND:VCARD", body),
            &SourceId::new(source),
        )
        .unwrap()
    }

    fn resolver() -> MergeResolver {
        MergeResolver::new(
            SourcePriority::new(["phone", "gmail", "linkedin"]),
            &MergeConfig::default(),
            "1",
        )
    }

    #[test]
    fn test_john_smith_keeps_org_and_phone_with_one_email() {
        let a = record("phone", "FN:John Smith\nN:Smith;John;;;\nEMAIL:john@email.com\nORG:Apple Inc.");
        let b = record("gmail", "FN:John Smith\nN:Smith;John;;;\nEMAIL:john@email.com\nTEL:555-1234");
        let merged = resolver().merge(&[a.clone(), b.clone()]).unwrap();

        let out = &merged.record;
        assert_eq!(out.source_id(), &SourceId::merged());
        assert_eq!(out.emails(), vec!["john@email.com".to_string()]);
        assert_eq!(out.phones(), vec!["555-1234".to_string()]);
        assert_eq!(out.organization().as_deref(), Some("Apple Inc."));
        assert_eq!(out.formatted_name().as_deref(), Some("John Smith"));
        assert!(out.named("X-ALTERNATE-FN").next().is_none());
        assert!(!merged.has_conflicts());
        assert_eq!(merged.contributing_source_ids.len(), 2);

        let email = &merged.field_provenance["EMAIL"][0];
        assert_eq!(email.value, "john@email.com");
        assert_eq!(email.sources.len(), 2);
        assert!(email.records.contains(a.id()) && email.records.contains(b.id()));
    }

    #[test]
    fn test_jane_doe_org_conflict_is_flagged() {
        let a = record("phone", "FN:Jane Doe\nN:Doe;Jane;;;\nEMAIL:jane@email.com\nORG:Microsoft");
        let b = record("gmail", "FN:Jane Doe\nN:Doe;Jane;;;\nEMAIL:jane@email.com\nORG:Google");
        let merged = resolver().merge(&[a, b]).unwrap();

        assert_eq!(merged.record.organization().as_deref(), Some("Microsoft"));
        let alternate = merged.record.named("X-ALTERNATE-ORG").next().unwrap();
        assert_eq!(alternate.text_value(), "Google");
        assert_eq!(alternate.param(SOURCE_PARAM).unwrap().values, vec!["gmail".to_string()]);
        assert_eq!(merged.review_flags.len(), 1);
        assert_eq!(merged.review_flags[0].field, "ORG");
        assert_eq!(merged.review_flags[0].values.len(), 2);
    }

    #[test]
    fn test_additive_union_with_type_params() {
        let a = record(
            "phone",
            "FN:Ann Lee\nN:Lee;Ann;;;\nEMAIL;TYPE=WORK:ann@acme.com\nTEL:+15551234567\nURL:https://acme.com/ann",
        );
        let b = record(
            "gmail",
            "FN:Ann Lee\nN:Lee;Ann;;;\nEMAIL;TYPE=HOME:Ann@Acme.com\nEMAIL:ann@home.org\n\
             TEL:(555) 999-0000\nADR;TYPE=HOME:;;1 Main St;Springfield;IL;62701;USA",
        );
        let merged = resolver().merge(&[b, a]).unwrap();
        let out = &merged.record;
        assert_eq!(out.emails(), vec!["ann@acme.com".to_string(), "ann@home.org".to_string()]);
        assert_eq!(
            out.first(FieldKind::Email).unwrap().type_values(),
            vec!["HOME".to_string(), "WORK".to_string()]
        );
        assert_eq!(out.phones().len(), 2);
        assert_eq!(out.named("URL").count(), 1);
        assert_eq!(out.named("ADR").count(), 1);
        assert_eq!(merged.retained_values("EMAIL"), vec!["ann@acme.com", "ann@home.org"]);
    }

    #[test]
    fn test_longest_name_wins_and_alternates_kept() {
        let a = record("phone", "FN:Bob Stone\nN:Stone;Bob;;;\nTITLE:CTO");
        let b = record("linkedin", "FN:Robert J. Stone\nN:Stone;Robert;J.;;\nTITLE:Chief Technology Officer");
        let merged = resolver().merge(&[a, b]).unwrap();
        let out = &merged.record;
        assert_eq!(out.formatted_name().as_deref(), Some("Robert J. Stone"));
        assert_eq!(out.first(FieldKind::StructuredName).unwrap().value, "Stone;Robert;J.;;");
        assert_eq!(out.named("X-ALTERNATE-FN").next().unwrap().text_value(), "Bob Stone");
        assert_eq!(
            out.first(FieldKind::Title).unwrap().text_value(),
            "Chief Technology Officer"
        );
        assert_eq!(out.named("X-ALTERNATE-TITLE").next().unwrap().text_value(), "CTO");
        assert!(!merged.has_conflicts());
    }

    #[test]
    fn test_priority_policy_from_config() {
        let mut config = MergeConfig::default();
        config.selection_policy = SelectionPolicyKind::Priority;
        let resolver = MergeResolver::new(SourcePriority::new(["phone", "linkedin"]), &config, "1");
        let a = record("phone", "FN:Bob Stone\nN:Stone;Bob;;;");
        let b = record("linkedin", "FN:Robert J. Stone\nN:Stone;Robert;J.;;");
        let merged = resolver.merge(&[b, a]).unwrap();
        assert_eq!(merged.record.formatted_name().as_deref(), Some("Bob Stone"));
        assert_eq!(merged.record.first(FieldKind::StructuredName).unwrap().value, "Stone;Bob;;;");
    }

    #[test]
    fn test_birthday_conflict_keeps_all_values() {
        let a = record("phone", "FN:Cy Young\nN:Young;Cy;;;\nBDAY:1980-04-01");
        let b = record("gmail", "FN:Cy Young\nN:Young;Cy;;;\nBDAY:19800501");
        let merged = resolver().merge(&[a, b]).unwrap();
        assert!(merged.record.first(FieldKind::Birthday).is_none());
        let conflicts: Vec<String> = merged
            .record
            .named(CONFLICT_BDAY)
            .map(|p| p.text_value())
            .collect();
        assert_eq!(conflicts, vec!["1980-04-01".to_string(), "19800501".to_string()]);
        assert_eq!(merged.review_flags[0].field, "BDAY");
    }

    #[test]
    fn test_birthday_within_tolerance_agrees() {
        let mut config = MergeConfig::default();
        config.birthday_tolerance_days = 1;
        let resolver = MergeResolver::new(SourcePriority::new(["phone", "gmail"]), &config, "1");
        let a = record("phone", "FN:Cy Young\nN:Young;Cy;;;\nBDAY:1980-04-01");
        let b = record("gmail", "FN:Cy Young\nN:Young;Cy;;;\nBDAY:1980-04-02");
        let merged = resolver.merge(&[b, a]).unwrap();
        assert_eq!(
            merged.record.first(FieldKind::Birthday).unwrap().value,
            "1980-04-01"
        );
        assert!(!merged.has_conflicts());
    }

    #[test]
    fn test_birthday_within_tolerance_keeps_other_value_as_alternate() {
        let mut config = MergeConfig::default();
        config.birthday_tolerance_days = 3;
        let resolver = MergeResolver::new(SourcePriority::new(["phone", "gmail"]), &config, "1");
        let a = record("phone", "FN:Cy Young\nN:Young;Cy;;;\nBDAY:1980-04-01");
        let b = record("gmail", "FN:Cy Young\nN:Young;Cy;;;\nBDAY:1980-04-03");
        let merged = resolver.merge(&[a, b]).unwrap();

        let out = &merged.record;
        assert_eq!(out.first(FieldKind::Birthday).unwrap().value, "1980-04-01");
        let alternate = out.named("X-ALTERNATE-BDAY").next().unwrap();
        assert_eq!(alternate.text_value(), "1980-04-03");
        assert_eq!(alternate.param(SOURCE_PARAM).unwrap().values, vec!["gmail".to_string()]);
        assert!(!merged.has_conflicts());
    }

    #[test]
    fn test_non_critical_birthday_keeps_every_value() {
        let mut config = MergeConfig::default();
        config.critical_fields = vec!["ORG".to_string()];
        let resolver = MergeResolver::new(SourcePriority::new(["phone", "gmail"]), &config, "1");
        let a = record("phone", "FN:Cy Young\nBDAY:1980-04-01");
        let b = record("gmail", "FN:Cy Young\nBDAY:1975-12-24");
        let merged = resolver.merge(&[a, b]).unwrap();
        assert_eq!(merged.record.named("BDAY").count(), 1);
        assert_eq!(
            merged.record.named("X-ALTERNATE-BDAY").next().unwrap().text_value(),
            "1975-12-24"
        );
    }

    #[test]
    fn test_losing_structured_name_is_kept_as_alternate() {
        let a = record("phone", "FN:Cy Young\nN:Young;Cy;;;");
        let b = record("gmail", "FN:Cy Young\nN:Young;Cy;;Dr.;PhD");
        let c = record("linkedin", "FN:Cy Young\nN:young;cy;;;");
        let merged = resolver().merge(&[c, b, a]).unwrap();

        let out = &merged.record;
        assert_eq!(out.first(FieldKind::StructuredName).unwrap().value, "Young;Cy;;;");
        let alternates: Vec<&Property> = out.named("X-ALTERNATE-N").collect();
        assert_eq!(alternates.len(), 1);
        assert_eq!(alternates[0].value, "Young;Cy;;Dr.;PhD");
        assert_eq!(alternates[0].param(SOURCE_PARAM).unwrap().values, vec!["gmail".to_string()]);
        assert_eq!(merged.field_provenance["N"].len(), 2);
    }

    #[test]
    fn test_notes_are_prefixed_and_exact_duplicate_lines_dropped() {
        let a = record("phone", "FN:Di Ng\nN:Ng;Di;;;\nNOTE:met at conf\\nlikes tea");
        let b = record("gmail", "FN:Di Ng\nN:Ng;Di;;;\nNOTE:likes tea");
        let c = record("linkedin", "FN:Di Ng\nN:Ng;Di;;;\nNOTE:Likes tea");
        let merged = resolver()
            .with_labels(BTreeMap::from([(SourceId::new("phone"), "iPhone".to_string())]))
            .merge(&[c, b, a])
            .unwrap();
        let notes = merged.record.notes();
        assert_eq!(notes.len(), 1);
        let lines: Vec<&str> = notes[0].lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("[iPhone "));
        assert!(lines[0].ends_with("] met at conf"));
        assert_eq!(lines[1], "likes tea");
        assert!(lines[2].starts_with("[linkedin "));
        assert!(lines[2].ends_with("] Likes tea"));
    }

    #[test]
    fn test_singleton_passes_through() {
        let a = record("phone", "FN:Solo Person\nN:Person;Solo;;;\nEMAIL:solo@x.org\nNOTE:hi");
        let merged = merge(&[a.clone()]).unwrap();
        assert_eq!(merged.record.properties(), a.properties());
        assert_eq!(merged.contributing_record_ids, vec![a.id().clone()]);
        assert_eq!(merged.retained_values("EMAIL"), vec!["solo@x.org"]);
    }

    #[test]
    fn test_merge_is_independent_of_input_order() {
        let a = record("phone", "FN:Eve Park\nN:Park;Eve;;;\nEMAIL:eve@x.org\nTEL:555-123-4567\nNOTE:one");
        let b = record("gmail", "FN:Eve  Park\nN:Park;Eve;;;\nEMAIL:EVE@x.org\nORG:Initech\nNOTE:two");
        let c = record("linkedin", "FN:Evelyn Park\nN:Park;Evelyn;;;\nTITLE:Engineer\nURL:https://eve.dev");
        let forward = resolver().merge(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let backward = resolver().merge(&[c, b, a]).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_empty_group_is_an_error() {
        assert!(matches!(merge(&[]), Err(Error::Other(_))));
    }

    #[test]
    fn test_alternate_property_escapes() {
        let p = alternate_property("ORG", &SourceId::new("gmail"), "A; B");
        assert_eq!(p.value, "A\\; B");
        assert_eq!(p.name, "X-ALTERNATE-ORG");
    }
}
