use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::report::{ValidationReport, Violation, ViolationCode};
use super::validator::{
    email_key, is_company_card, note_extraction_candidates, Validator, DEFAULT_VERSION,
};
use crate::model::{escape_text, split_unescaped, FieldKind, Property, Record, RecordId};
use crate::normalize;

/// Marker parameter on properties pulled out of free-text notes.
pub const EXTRACTED_PARAM: &str = "X-EXTRACTED-FROM";

/// A record whose hard violations survive the fixer. It goes to manual handling.
#[derive(Error, Debug, Clone)]
#[error("record {record_id} v{version} is unfixable: {}", violation_codes(.violations))]
pub struct UnfixableRecord {
    pub record_id: RecordId,
    pub version: u32,
    pub violations: Vec<Violation>,
    pub record: Box<Record>,
}

fn violation_codes(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStage {
    HardFix,
    Capitalization,
    PhoneFormat,
    EmailCleanup,
    NoteExtraction,
}

impl FixStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStage::HardFix => "hard_fix",
            FixStage::Capitalization => "capitalization",
            FixStage::PhoneFormat => "phone_format",
            FixStage::EmailCleanup => "email_cleanup",
            FixStage::NoteExtraction => "note_extraction",
        }
    }
}

/// One produced version and why it was produced.
#[derive(Debug, Clone)]
pub struct FixStep {
    pub stage: FixStage,
    pub description: String,
    pub before: Record,
    pub after: Record,
}

/// The final version of a record after the fixer, with its final report and the
/// versions produced on the way.
#[derive(Debug, Clone)]
pub struct FixedRecord {
    pub record: Record,
    pub report: ValidationReport,
    pub steps: Vec<FixStep>,
}

impl FixedRecord {
    pub fn changed(&self) -> bool {
        !self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Fixer {
    validator: Validator,
}

const SOFT_STAGES: [FixStage; 4] = [
    FixStage::Capitalization,
    FixStage::PhoneFormat,
    FixStage::EmailCleanup,
    FixStage::NoteExtraction,
];

impl Fixer {
    pub fn new(validator: Validator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Validate then fix.
    pub fn fix_record(&self, record: &Record) -> Result<FixedRecord, UnfixableRecord> {
        let report = self.validator.validate(record);
        self.fix(record, &report)
    }

    /// Repair `record` given its report. Every stage that changes something yields
    /// a new version which is re-validated before the next stage runs.
    pub fn fix(
        &self,
        record: &Record,
        report: &ValidationReport,
    ) -> Result<FixedRecord, UnfixableRecord> {
        let mut current = record.clone();
        let mut report = if report.record_version == record.version() && &report.record_id == record.id() {
            report.clone()
        } else {
            self.validator.validate(record)
        };
        let mut steps = Vec::new();

        if report.has_hard() {
            if let Some((properties, description)) = hard_fix(&current, &report) {
                let next = current.derive(properties);
                report = self.validator.validate(&next);
                steps.push(FixStep {
                    stage: FixStage::HardFix,
                    description,
                    before: current,
                    after: next.clone(),
                });
                current = next;
            }
            if report.has_hard() {
                warn!(
                    "Record {} remains hard-invalid after fixing: {}",
                    current.id(),
                    report.summary()
                );
                return Err(unfixable(current, &report));
            }
        }

        for stage in SOFT_STAGES {
            let Some((properties, description)) = self.soft_fix(stage, &current, &report) else {
                continue;
            };
            let next = current.derive(properties);
            let next_report = self.validator.validate(&next);
            if next_report.has_hard() {
                return Err(unfixable(next, &next_report));
            }
            trace!("{} v{}: {}", next.id(), next.version(), description);
            steps.push(FixStep {
                stage,
                description,
                before: current,
                after: next.clone(),
            });
            current = next;
            report = next_report;
        }

        if !steps.is_empty() {
            debug!(
                "Fixed {} in {} step(s); remaining: {}",
                current.id(),
                steps.len(),
                report.summary()
            );
        }

        Ok(FixedRecord {
            record: current,
            report,
            steps,
        })
    }

    fn soft_fix(
        &self,
        stage: FixStage,
        record: &Record,
        report: &ValidationReport,
    ) -> Option<(Vec<Property>, String)> {
        let result = match stage {
            FixStage::Capitalization if report.has(ViolationCode::NameCapitalization) => {
                fix_capitalization(record, report)
            }
            FixStage::PhoneFormat if report.has(ViolationCode::PhoneFormat) => {
                fix_phones(record, self.validator.default_country_code())
            }
            FixStage::EmailCleanup
                if report.has(ViolationCode::EmailNotNormalized)
                    || report.has(ViolationCode::DuplicateEmail) =>
            {
                fix_emails(record)
            }
            FixStage::NoteExtraction if report.has(ViolationCode::NoteExtractionCandidate) => {
                extract_from_notes(record, self.validator.default_country_code())
            }
            _ => return None,
        };
        result.filter(|(properties, _)| properties.as_slice() != record.properties())
    }
}

/// Fix with the default validator.
pub fn fix_record(record: &Record) -> Result<FixedRecord, UnfixableRecord> {
    Fixer::default().fix_record(record)
}

fn unfixable(record: Record, report: &ValidationReport) -> UnfixableRecord {
    UnfixableRecord {
        record_id: record.id().clone(),
        version: record.version(),
        violations: report.hard().cloned().collect(),
        record: Box::new(record),
    }
}

fn hard_fix(record: &Record, report: &ValidationReport) -> Option<(Vec<Property>, String)> {
    let mut properties = record.properties().to_vec();
    let mut actions = Vec::new();

    if report.has(ViolationCode::MissingVersion) {
        properties.insert(0, Property::new("VERSION", DEFAULT_VERSION));
        actions.push(format!("injected VERSION {}", DEFAULT_VERSION));
    } else if report.has(ViolationCode::UnsupportedVersion) {
        if let Some(pos) = properties.iter().position(|p| p.kind() == FieldKind::Version) {
            let original = properties[pos].value.trim().to_string();
            properties[pos] = Property::new("VERSION", DEFAULT_VERSION);
            properties.insert(pos + 1, Property::new("X-ORIGINAL-VERSION", escape_text(&original)));
            actions.push(format!("replaced VERSION {} with {}", original, DEFAULT_VERSION));
        }
    }

    if report.has(ViolationCode::MissingFormattedName) {
        let derived = record
            .first(FieldKind::StructuredName)
            .map(|n| display_name_from_parts(&n.components()))
            .filter(|name| !name.is_empty());
        let (name, origin) = match derived {
            Some(name) => (Some(name), "structured name"),
            None => (record.organization(), "organization"),
        };
        if let Some(name) = name {
            let fn_prop = Property::text("FN", &name);
            match properties
                .iter()
                .position(|p| p.kind() == FieldKind::FormattedName)
            {
                Some(pos) => properties[pos] = properties[pos].with_value(fn_prop.value),
                None => {
                    let at = properties
                        .iter()
                        .position(|p| p.kind() == FieldKind::StructuredName)
                        .unwrap_or(properties.len().min(1));
                    properties.insert(at, fn_prop);
                }
            }
            actions.push(format!("derived FN '{}' from {}", name, origin));
        }
    }

    if report.has(ViolationCode::MissingStructuredName) {
        let display = properties
            .iter()
            .find(|p| p.kind() == FieldKind::FormattedName)
            .map(|p| p.text_value().trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(display) = display {
            let org = record.organization();
            let parts = if org.as_deref().is_some_and(|o| o.eq_ignore_ascii_case(&display)) {
                ["", "", "", "", ""].map(String::from)
            } else {
                parts_from_display_name(&display)
            };
            let at = properties
                .iter()
                .position(|p| p.kind() == FieldKind::FormattedName)
                .map(|i| i + 1)
                .unwrap_or(properties.len());
            properties.insert(at, Property::structured("N", &parts));
            actions.push(format!("synthesized N from FN '{}'", display));
        }
    }

    if actions.is_empty() {
        return None;
    }
    Some((properties, actions.join("; ")))
}

/// `prefix given additional family suffix`, skipping empty parts.
fn display_name_from_parts(components: &[String]) -> String {
    let order = [3usize, 1, 2, 0, 4];
    order
        .iter()
        .filter_map(|&i| components.get(i))
        .map(|c| c.replace(',', " ").trim().to_string())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a display name into N components: the last token is the family name and
/// the rest the given name. "Family, Given" is honored.
fn parts_from_display_name(display: &str) -> [String; 5] {
    if let Some((family, given)) = display.split_once(',') {
        return [
            family.trim().to_string(),
            given.trim().to_string(),
            String::new(),
            String::new(),
            String::new(),
        ];
    }
    let tokens: Vec<&str> = display.split_whitespace().collect();
    match tokens.split_last() {
        Some((family, given)) => [
            family.to_string(),
            given.join(" "),
            String::new(),
            String::new(),
            String::new(),
        ],
        None => Default::default(),
    }
}

fn fix_capitalization(
    record: &Record,
    report: &ValidationReport,
) -> Option<(Vec<Property>, String)> {
    if is_company_card(record) {
        return None;
    }
    let mut changed = Vec::new();
    let properties = record
        .properties()
        .iter()
        .map(|p| match p.kind() {
            FieldKind::FormattedName if report.has_on(ViolationCode::NameCapitalization, "FN") => {
                let normalized = normalize::normalize_name(&p.text_value());
                changed.push(format!("FN -> '{}'", normalized));
                p.with_value(escape_text(&normalized))
            }
            FieldKind::StructuredName if report.has_on(ViolationCode::NameCapitalization, "N") => {
                let raw = split_unescaped(&p.value, ';')
                    .iter()
                    .map(|c| normalize::normalize_name(c))
                    .collect::<Vec<_>>()
                    .join(";");
                changed.push(format!("N -> '{}'", raw));
                p.with_value(raw)
            }
            _ => p.clone(),
        })
        .collect();
    Some((properties, format!("normalized name capitalization: {}", changed.join(", "))))
}

fn fix_phones(record: &Record, default_country_code: &str) -> Option<(Vec<Property>, String)> {
    let mut properties = Vec::with_capacity(record.properties().len() + 2);
    let mut rewritten = 0usize;
    for p in record.properties() {
        if p.kind() != FieldKind::Phone {
            properties.push(p.clone());
            continue;
        }
        let text = p.text_value();
        match normalize::normalize_phone_with(&text, default_country_code) {
            Ok(phone) if phone.canonical != text => {
                properties.push(p.with_value(escape_text(&phone.canonical)));
                properties.push(Property::text("X-ORIGINAL-TEL", &phone.original));
                rewritten += 1;
            }
            _ => properties.push(p.clone()),
        }
    }
    Some((
        properties,
        format!("reformatted {} phone number(s), originals kept as X-ORIGINAL-TEL", rewritten),
    ))
}

fn fix_emails(record: &Record) -> Option<(Vec<Property>, String)> {
    let mut properties: Vec<Property> = Vec::with_capacity(record.properties().len());
    let mut kept_at: AHashMap<String, usize> = AHashMap::new();
    let mut lowered = 0usize;
    let mut merged = 0usize;

    for p in record.properties() {
        if p.kind() != FieldKind::Email {
            properties.push(p.clone());
            continue;
        }
        let text = p.text_value();
        let key = email_key(&text);
        if let Some(&index) = kept_at.get(&key) {
            for param in &p.params {
                for value in &param.values {
                    properties[index].add_param_value(&param.name, value);
                }
            }
            merged += 1;
            continue;
        }
        let property = match normalize::normalize_email(&text) {
            Ok(normalized) if normalized != text => {
                lowered += 1;
                p.with_value(escape_text(&normalized))
            }
            _ => p.clone(),
        };
        kept_at.insert(key, properties.len());
        properties.push(property);
    }

    Some((
        properties,
        format!("normalized {} email(s), folded {} duplicate(s)", lowered, merged),
    ))
}

fn extract_from_notes(record: &Record, default_country_code: &str) -> Option<(Vec<Property>, String)> {
    let candidates = note_extraction_candidates(record, default_country_code);
    if candidates.is_empty() {
        return None;
    }

    let mut properties = Vec::with_capacity(record.properties().len() + 4);
    let mut note_index = 0usize;
    let mut extracted = Vec::new();
    for p in record.properties() {
        if p.kind() != FieldKind::Note {
            properties.push(p.clone());
            continue;
        }
        match candidates.iter().find(|c| c.note_index == note_index) {
            Some(found) => {
                let marker = format!(
                    "[extracted {} email(s) and {} phone(s) into structured fields]",
                    found.emails.len(),
                    found.phones.len()
                );
                let text = format!("{}\n{}", p.text_value(), marker);
                properties.push(p.with_value(escape_text(&text)));
            }
            None => properties.push(p.clone()),
        }
        note_index += 1;
    }

    for found in &candidates {
        for email in &found.emails {
            properties.push(Property::text("EMAIL", email).with_param(EXTRACTED_PARAM, "NOTE"));
            extracted.push(email.clone());
        }
        for phone in &found.phones {
            properties.push(Property::text("TEL", phone).with_param(EXTRACTED_PARAM, "NOTE"));
            extracted.push(phone.clone());
        }
    }

    Some((
        properties,
        format!("extracted from notes: {}", extracted.join(", ")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::report::ValidationState;
    use crate::model::SourceId;
    use crate::vcard::ingest;

    fn parse(body: &str) -> Record {
        ingest(
            &format!("BEGIN:VCARD\n{}\nEND:VCARD", body),
            &SourceId::new("test"),
        )
        .unwrap()
    }

    #[test]
    fn test_display_name_derived_from_structured_name() {
        let record = parse("VERSION:3.0\nN:Smith;John;Q;Dr.;Jr.");
        let fixed = fix_record(&record).unwrap();
        assert_eq!(fixed.record.formatted_name().as_deref(), Some("Dr. John Q Smith Jr."));
        assert_eq!(fixed.report.hard().count(), 0);
        assert_eq!(fixed.steps[0].stage, FixStage::HardFix);
    }

    #[test]
    fn test_structured_name_and_version_synthesized() {
        let record = parse("FN:Mary Ann Jones");
        let fixed = fix_record(&record).unwrap();
        let n = fixed.record.first(FieldKind::StructuredName).unwrap();
        assert_eq!(n.components()[0], "Jones");
        assert_eq!(n.components()[1], "Mary Ann");
        assert_eq!(
            fixed.record.first(FieldKind::Version).unwrap().value,
            DEFAULT_VERSION
        );
        assert_eq!(fixed.report.state(), ValidationState::Valid);
    }

    #[test]
    fn test_unsupported_version_keeps_original() {
        let record = parse("VERSION:5.0\nFN:A B\nN:B;A;;;");
        let fixed = fix_record(&record).unwrap();
        assert_eq!(fixed.record.first(FieldKind::Version).unwrap().value, "3.0");
        assert_eq!(fixed.record.named("X-ORIGINAL-VERSION").next().unwrap().value, "5.0");
    }

    #[test]
    fn test_record_without_any_name_is_unfixable() {
        let record = parse("VERSION:3.0\nEMAIL:someone@example.com");
        let err = fix_record(&record).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| v.code == ViolationCode::MissingFormattedName));
        assert_eq!(err.record_id, *record.id());
    }

    #[test]
    fn test_organization_only_card_becomes_company_card() {
        let record = parse("VERSION:3.0\nORG:IBM");
        let fixed = fix_record(&record).unwrap();
        assert_eq!(fixed.record.formatted_name().as_deref(), Some("IBM"));
        assert_eq!(fixed.record.first(FieldKind::StructuredName).unwrap().value, ";;;;");
        assert_eq!(fixed.report.state(), ValidationState::Valid);
    }

    #[test]
    fn test_soft_fixes_each_produce_a_version() {
        let record = parse(
            "VERSION:3.0\nFN:JOHN SMITH\nN:SMITH;JOHN;;;\nTEL;TYPE=CELL:(555) 123-4567\n\
             EMAIL;TYPE=WORK:John@Email.COM\nEMAIL;TYPE=HOME:john@email.com\n\
             NOTE:assistant: amy@acme.com",
        );
        let fixed = fix_record(&record).unwrap();
        let stages: Vec<FixStage> = fixed.steps.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                FixStage::Capitalization,
                FixStage::PhoneFormat,
                FixStage::EmailCleanup,
                FixStage::NoteExtraction,
            ]
        );
        for (i, step) in fixed.steps.iter().enumerate() {
            assert_eq!(step.after.version(), record.version() + i as u32 + 1);
            assert_eq!(step.after.parent_version(), Some(step.before.version()));
        }

        let out = &fixed.record;
        assert_eq!(out.formatted_name().as_deref(), Some("John Smith"));
        assert_eq!(out.phones()[0], "+15551234567");
        assert_eq!(out.named("X-ORIGINAL-TEL").next().unwrap().text_value(), "(555) 123-4567");
        let emails = out.emails();
        assert_eq!(emails, vec!["john@email.com".to_string(), "amy@acme.com".to_string()]);
        let kept = out.first(FieldKind::Email).unwrap();
        assert_eq!(kept.type_values(), vec!["HOME".to_string(), "WORK".to_string()]);
        assert!(out.notes()[0].starts_with("assistant: amy@acme.com\n[extracted 1 email(s)"));
        assert_eq!(fixed.report.state(), ValidationState::Valid, "{}", fixed.report.summary());
        assert_eq!(out.source_id(), record.source_id());
    }

    #[test]
    fn test_fix_is_idempotent() {
        let samples = [
            "FN:mary o'neil\nTEL:555.123.4567 x12\nEMAIL:Mary@X.org\nNOTE:cell 555-987-6543",
            "VERSION:3.0\nN:Doe;Jane;;;\nEMAIL:bad-address\nTEL:n/a",
            "VERSION:2.1\nFN:Jean-Luc PICARD\nN:PICARD;Jean-Luc;;;\nEMAIL:jl@fleet.org\nEMAIL:JL@FLEET.ORG",
        ];
        for body in samples {
            let record = parse(body);
            let once = fix_record(&record).unwrap();
            let twice = fix_record(&once.record).unwrap();
            assert!(twice.steps.is_empty(), "{body}: {:?}", twice.steps.iter().map(|s| &s.description).collect::<Vec<_>>());
            assert_eq!(twice.record, once.record, "{body}");
            assert!(twice.report.is_clean());
        }
    }

    #[test]
    fn test_unfixable_soft_violations_are_surfaced() {
        let record = parse("VERSION:3.0\nFN:Jane Doe\nN:Doe;Jane;;;\nEMAIL:bad-address\nTEL:n/a");
        let fixed = fix_record(&record).unwrap();
        assert!(fixed.steps.is_empty());
        assert_eq!(fixed.report.state(), ValidationState::SoftFlagged);
        assert!(fixed.report.has(ViolationCode::MalformedEmail));
        assert!(fixed.report.has(ViolationCode::MalformedPhone));
    }
}
