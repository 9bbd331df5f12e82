use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::debug;

use super::entry::{AuditAction, AuditEntry, RecordSnapshot};
use crate::error::Error;

/// Persistent destination for ledger entries.
pub trait AuditSink {
    fn write_entries(&self, run_id: i64, entries: &[AuditEntry]) -> Result<usize, Error>;
}

/// Append-only, sequence-numbered decision log.
///
/// Appends are serialized through one lock that only covers sequence assignment
/// and the in-memory push. Readers clone a snapshot; sink I/O happens on a
/// snapshot and never holds the append lock.
#[derive(Debug, Default)]
pub struct AuditLedger {
    next_seq: Mutex<u64>,
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry`, returning its assigned sequence number (starting at 1).
    pub fn append(&self, mut entry: AuditEntry) -> u64 {
        let mut next = self
            .next_seq
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *next += 1;
        entry.seq = *next;
        let seq = entry.seq;
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
        seq
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry in sequence order.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.read().clone()
    }

    pub fn by_subject(&self, subject: &str) -> Vec<AuditEntry> {
        self.read()
            .iter()
            .filter(|e| e.concerns(subject))
            .cloned()
            .collect()
    }

    pub fn by_action(&self, action: AuditAction) -> Vec<AuditEntry> {
        self.read()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.read().iter().filter(|e| e.action == action).count()
    }

    /// Input records of the merge that produced `contact_id`, as they were
    /// before merging. Empty when no such merge was logged.
    pub fn merge_inputs(&self, contact_id: &str) -> Result<Vec<RecordSnapshot>, Error> {
        merge_inputs(&self.read(), contact_id)
    }

    /// Write a snapshot of the ledger to `sink`.
    pub fn flush_to(&self, sink: &dyn AuditSink, run_id: i64) -> Result<usize, Error> {
        let entries = self.snapshot();
        let written = sink.write_entries(run_id, &entries)?;
        debug!("Flushed {} audit entries for run {}", written, run_id);
        Ok(written)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<AuditEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Before-snapshots of the merge entry whose first subject is `contact_id`.
pub fn merge_inputs(entries: &[AuditEntry], contact_id: &str) -> Result<Vec<RecordSnapshot>, Error> {
    let Some(entry) = entries.iter().rev().find(|e| {
        e.action == AuditAction::Merge && e.subject_ids.first().map(String::as_str) == Some(contact_id)
    }) else {
        return Ok(Vec::new());
    };
    match &entry.before {
        Some(before) => Ok(serde_json::from_value(before.clone())?),
        None => Ok(Vec::new()),
    }
}

/// Appends entries as JSON Lines.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read every entry back from the file.
    pub fn read_all(&self) -> Result<Vec<AuditEntry>, Error> {
        let content = fs::read_to_string(&self.path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }
}

impl AuditSink for JsonlSink {
    fn write_entries(&self, _run_id: i64, entries: &[AuditEntry]) -> Result<usize, Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for entry in entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(entries.len())
    }
}
