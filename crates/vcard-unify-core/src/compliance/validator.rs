use ahash::AHashSet;
use tracing::trace;

use super::report::{ValidationReport, ValidationState, Violation, ViolationCode};
use crate::model::{split_unescaped, FieldKind, Record};
use crate::normalize::{self, extract};

pub const SUPPORTED_VERSIONS: &[&str] = &["2.1", "3.0", "4.0"];
pub const DEFAULT_VERSION: &str = "3.0";

/// Checks one record version against the record grammar.
#[derive(Debug, Clone)]
pub struct Validator {
    default_country_code: String,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(normalize::DEFAULT_COUNTRY_CODE)
    }
}

impl Validator {
    pub fn new(default_country_code: &str) -> Self {
        Self {
            default_country_code: default_country_code.to_string(),
        }
    }

    pub fn default_country_code(&self) -> &str {
        &self.default_country_code
    }

    pub fn validate(&self, record: &Record) -> ValidationReport {
        let mut state = ValidationState::Unchecked;
        advance(&mut state, ValidationState::Checking);

        let mut violations = Vec::new();
        check_mandatory(record, &mut violations);
        check_structured_name(record, &mut violations);
        check_capitalization(record, &mut violations);
        self.check_phones(record, &mut violations);
        check_emails(record, &mut violations);
        self.check_notes(record, &mut violations);

        let report = ValidationReport {
            record_id: record.id().clone(),
            record_version: record.version(),
            violations,
        };
        advance(&mut state, report.state());
        trace!(
            "Validated {} v{}: {:?} [{}]",
            record.id(),
            record.version(),
            state,
            report.summary()
        );
        report
    }

    fn check_phones(&self, record: &Record, violations: &mut Vec<Violation>) {
        for tel in record.of_kind(FieldKind::Phone) {
            let text = tel.text_value();
            match normalize::normalize_phone_with(&text, &self.default_country_code) {
                Ok(phone) if phone.canonical != text => violations.push(Violation::new(
                    ViolationCode::PhoneFormat,
                    "TEL",
                    format!("'{}' is not in canonical form '{}'", text, phone.canonical),
                )),
                Ok(_) => {}
                Err(_) => violations.push(Violation::new(
                    ViolationCode::MalformedPhone,
                    "TEL",
                    format!("'{}' cannot be read as a phone number", text),
                )),
            }
        }
    }

    fn check_notes(&self, record: &Record, violations: &mut Vec<Violation>) {
        let candidates = note_extraction_candidates(record, &self.default_country_code);
        for found in candidates.iter().flat_map(|c| c.emails.iter().chain(c.phones.iter())) {
            violations.push(Violation::new(
                ViolationCode::NoteExtractionCandidate,
                "NOTE",
                format!("'{}' in note is not a structured field", found),
            ));
        }
    }
}

fn advance(state: &mut ValidationState, next: ValidationState) {
    debug_assert!(
        state.can_transition(next),
        "illegal validation transition {:?} -> {:?}",
        state,
        next
    );
    *state = next;
}

fn check_mandatory(record: &Record, violations: &mut Vec<Violation>) {
    if record.formatted_name().is_none() {
        violations.push(Violation::new(
            ViolationCode::MissingFormattedName,
            "FN",
            "formatted name is missing or empty",
        ));
    }

    match record.first(FieldKind::Version) {
        None => violations.push(Violation::new(
            ViolationCode::MissingVersion,
            "VERSION",
            "format version marker is missing",
        )),
        Some(version) if !SUPPORTED_VERSIONS.contains(&version.value.trim()) => {
            violations.push(Violation::new(
                ViolationCode::UnsupportedVersion,
                "VERSION",
                format!("unsupported format version '{}'", version.value.trim()),
            ))
        }
        Some(_) => {}
    }
}

fn check_structured_name(record: &Record, violations: &mut Vec<Violation>) {
    if !record.has(FieldKind::StructuredName) {
        violations.push(Violation::new(
            ViolationCode::MissingStructuredName,
            "N",
            "structured name is missing",
        ));
    }
}

/// Company cards (FN equal to the organization) keep their spelling.
pub(crate) fn is_company_card(record: &Record) -> bool {
    match (record.formatted_name(), record.organization()) {
        (Some(name), Some(org)) => name.eq_ignore_ascii_case(&org),
        _ => false,
    }
}

fn check_capitalization(record: &Record, violations: &mut Vec<Violation>) {
    if is_company_card(record) {
        return;
    }
    if let Some(name) = record.first(FieldKind::FormattedName).map(|p| p.text_value()) {
        let normalized = normalize::normalize_name(&name);
        if !name.trim().is_empty() && normalized != name {
            violations.push(Violation::new(
                ViolationCode::NameCapitalization,
                "FN",
                format!("'{}' should read '{}'", name, normalized),
            ));
        }
    }
    if let Some(n) = record.first(FieldKind::StructuredName) {
        let needs_fix = split_unescaped(&n.value, ';')
            .iter()
            .any(|c| normalize::normalize_name(c) != *c);
        if needs_fix {
            violations.push(Violation::new(
                ViolationCode::NameCapitalization,
                "N",
                format!("structured name '{}' has uniform-case parts", n.value),
            ));
        }
    }
}

/// Key used to detect duplicate emails within one record.
pub(crate) fn email_key(text: &str) -> String {
    normalize::normalize_email(text).unwrap_or_else(|_| text.trim().to_lowercase())
}

fn check_emails(record: &Record, violations: &mut Vec<Violation>) {
    let mut seen: AHashSet<String> = AHashSet::new();
    for email in record.of_kind(FieldKind::Email) {
        let text = email.text_value();
        match normalize::normalize_email(&text) {
            Ok(normalized) if normalized != text => {
                let detail = match (normalize::email_domain(&normalized), text.rsplit_once('@')) {
                    (Some(domain), Some((_, raw_domain))) if domain != raw_domain.trim() => {
                        "domain is not lowercase"
                    }
                    _ => "not in normalized form",
                };
                violations.push(Violation::new(
                    ViolationCode::EmailNotNormalized,
                    "EMAIL",
                    format!("'{}' {}", text, detail),
                ));
            }
            Ok(_) => {}
            Err(_) => violations.push(Violation::new(
                ViolationCode::MalformedEmail,
                "EMAIL",
                format!("'{}' is not a valid address", text),
            )),
        }
        if !seen.insert(email_key(&text)) {
            violations.push(Violation::new(
                ViolationCode::DuplicateEmail,
                "EMAIL",
                format!("'{}' duplicates an earlier address", text),
            ));
        }
    }
}

/// Email and phone tokens found in one NOTE that are not yet structured fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NoteCandidates {
    pub note_index: usize,
    /// Normalized emails.
    pub emails: Vec<String>,
    /// Canonical phone numbers.
    pub phones: Vec<String>,
}

pub(crate) fn note_extraction_candidates(
    record: &Record,
    default_country_code: &str,
) -> Vec<NoteCandidates> {
    let mut known_emails: AHashSet<String> = record
        .emails()
        .iter()
        .map(|e| email_key(e))
        .collect();
    let mut known_phones: AHashSet<String> = record
        .phones()
        .iter()
        .filter_map(|p| normalize::normalize_phone_with(p, default_country_code).ok())
        .map(|p| p.key)
        .collect();

    let mut result = Vec::new();
    for (note_index, note) in record.of_kind(FieldKind::Note).enumerate() {
        let text = note.text_value();
        let mut candidates = NoteCandidates {
            note_index,
            ..Default::default()
        };
        for token in extract::extract_emails(&text) {
            if let Ok(email) = normalize::normalize_email(&token) {
                if known_emails.insert(email.clone()) {
                    candidates.emails.push(email);
                }
            }
        }
        for token in extract::extract_phones(&text) {
            if let Ok(phone) = normalize::normalize_phone_with(&token, default_country_code) {
                if known_phones.insert(phone.key.clone()) {
                    candidates.phones.push(phone.canonical);
                }
            }
        }
        if !candidates.emails.is_empty() || !candidates.phones.is_empty() {
            result.push(candidates);
        }
    }
    result
}
