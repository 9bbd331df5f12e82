pub mod audit;
pub mod compliance;
pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod matching;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod progress;
pub mod scanner;
pub mod storage;
pub mod vcard;

pub use audit::{AuditAction, AuditEntry, AuditLedger};
pub use compliance::{fix_record, FixedRecord, UnfixableRecord};
pub use config::AppConfig;
pub use engine::{CheckedRecord, RecordCheck, Resolution, UnifyEngine, UnifyResult};
pub use error::Error;
pub use matching::{build_candidates, group, GroupingOutcome};
pub use merge::merge;
pub use model::{ConflictFlag, MatchCandidate, MergedContact, Record, RecordId, SourceId};
pub use progress::{ProgressReporter, SilentReporter};
pub use vcard::{export, ingest, split_export, ParseError};
