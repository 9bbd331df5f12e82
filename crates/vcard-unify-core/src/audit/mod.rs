//! Append-only ledger of every fix, match, merge and skip decision.

pub mod entry;
pub mod ledger;

pub use entry::{Actor, AuditAction, AuditEntry, RecordSnapshot};
pub use ledger::{merge_inputs, AuditLedger, AuditSink, JsonlSink};
