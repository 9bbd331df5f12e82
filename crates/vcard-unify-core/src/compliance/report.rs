use serde::{Deserialize, Serialize};

use crate::model::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    MissingFormattedName,
    MissingVersion,
    UnsupportedVersion,
    MissingStructuredName,
    NameCapitalization,
    PhoneFormat,
    MalformedPhone,
    EmailNotNormalized,
    MalformedEmail,
    DuplicateEmail,
    NoteExtractionCandidate,
}

impl ViolationCode {
    pub fn severity(&self) -> Severity {
        match self {
            ViolationCode::MissingFormattedName
            | ViolationCode::MissingVersion
            | ViolationCode::UnsupportedVersion
            | ViolationCode::MissingStructuredName => Severity::Hard,
            _ => Severity::Soft,
        }
    }

    /// Whether the fixer has a safe automatic repair for this violation.
    pub fn auto_fixable(&self) -> bool {
        !matches!(self, ViolationCode::MalformedPhone | ViolationCode::MalformedEmail)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCode::MissingFormattedName => "missing_formatted_name",
            ViolationCode::MissingVersion => "missing_version",
            ViolationCode::UnsupportedVersion => "unsupported_version",
            ViolationCode::MissingStructuredName => "missing_structured_name",
            ViolationCode::NameCapitalization => "name_capitalization",
            ViolationCode::PhoneFormat => "phone_format",
            ViolationCode::MalformedPhone => "malformed_phone",
            ViolationCode::EmailNotNormalized => "email_not_normalized",
            ViolationCode::MalformedEmail => "malformed_email",
            ViolationCode::DuplicateEmail => "duplicate_email",
            ViolationCode::NoteExtractionCandidate => "note_extraction_candidate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub severity: Severity,
    pub code: ViolationCode,
    pub field: String,
    pub description: String,
}

impl Violation {
    pub fn new(code: ViolationCode, field: &str, description: impl Into<String>) -> Self {
        Self {
            severity: code.severity(),
            code,
            field: field.to_string(),
            description: description.into(),
        }
    }
}

/// Validation lifecycle of one record version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    Unchecked,
    Checking,
    Valid,
    HardInvalid,
    SoftFlagged,
}

impl ValidationState {
    pub fn can_transition(self, next: ValidationState) -> bool {
        use ValidationState::*;
        matches!(
            (self, next),
            (Unchecked, Checking) | (Checking, Valid) | (Checking, HardInvalid) | (Checking, SoftFlagged)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ValidationState::Valid | ValidationState::HardInvalid | ValidationState::SoftFlagged
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub record_id: RecordId,
    pub record_version: u32,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn hard(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Hard)
    }

    pub fn soft(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Soft)
    }

    pub fn has_hard(&self) -> bool {
        self.hard().next().is_some()
    }

    /// A record is clean when it has no hard violations.
    pub fn is_clean(&self) -> bool {
        !self.has_hard()
    }

    pub fn has(&self, code: ViolationCode) -> bool {
        self.violations.iter().any(|v| v.code == code)
    }

    pub fn has_on(&self, code: ViolationCode, field: &str) -> bool {
        self.violations
            .iter()
            .any(|v| v.code == code && v.field == field)
    }

    pub fn state(&self) -> ValidationState {
        if self.has_hard() {
            ValidationState::HardInvalid
        } else if self.violations.is_empty() {
            ValidationState::Valid
        } else {
            ValidationState::SoftFlagged
        }
    }

    pub fn summary(&self) -> String {
        if self.violations.is_empty() {
            return "valid".to_string();
        }
        self.violations
            .iter()
            .map(|v| format!("{}({})", v.code.as_str(), v.field))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(codes: &[ViolationCode]) -> ValidationReport {
        ValidationReport {
            record_id: RecordId::new("s/1"),
            record_version: 1,
            violations: codes
                .iter()
                .map(|c| Violation::new(*c, "FN", "test"))
                .collect(),
        }
    }

    #[test]
    fn test_state_classification() {
        assert_eq!(report(&[]).state(), ValidationState::Valid);
        assert_eq!(
            report(&[ViolationCode::PhoneFormat]).state(),
            ValidationState::SoftFlagged
        );
        assert_eq!(
            report(&[ViolationCode::PhoneFormat, ViolationCode::MissingVersion]).state(),
            ValidationState::HardInvalid
        );
    }

    #[test]
    fn test_state_transitions() {
        use ValidationState::*;
        assert!(Unchecked.can_transition(Checking));
        assert!(Checking.can_transition(SoftFlagged));
        assert!(!Unchecked.can_transition(Valid));
        assert!(!Valid.can_transition(Checking));
        assert!(HardInvalid.is_terminal());
        assert!(!Checking.is_terminal());
    }

    #[test]
    fn test_malformed_values_are_not_auto_fixable() {
        assert!(!ViolationCode::MalformedEmail.auto_fixable());
        assert!(ViolationCode::MissingStructuredName.auto_fixable());
        assert_eq!(ViolationCode::MissingStructuredName.severity(), Severity::Hard);
    }
}
