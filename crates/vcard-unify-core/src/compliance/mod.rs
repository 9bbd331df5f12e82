//! Record validation and automatic repair.

pub mod fixer;
pub mod report;
pub mod validator;

pub use fixer::{fix_record, FixStage, FixStep, FixedRecord, Fixer, UnfixableRecord};
pub use report::{Severity, ValidationReport, ValidationState, Violation, ViolationCode};
pub use validator::{Validator, DEFAULT_VERSION, SUPPORTED_VERSIONS};
