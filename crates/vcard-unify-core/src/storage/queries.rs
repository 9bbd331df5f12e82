use super::models::*;
use super::sqlite::Database;
use crate::audit::{AuditAction, AuditEntry, AuditSink};
use crate::model::MergedContact;
use crate::vcard;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result, Row};
use tracing::debug;

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn from_json<T: serde::de::DeserializeOwned + Default>(text: &str) -> T {
    serde_json::from_str(text).unwrap_or_default()
}

fn json_error(index: usize, err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

impl Database {
    // ── Runs ─────────────────────────────────────────────────────

    pub fn create_run(&self, source_ids: &[String]) -> Result<i64> {
        insert_run(self.connection(), source_ids)
    }

    pub fn complete_run(&self, run_id: i64, counts: &RunCounts) -> Result<()> {
        finish_run(self.connection(), run_id, counts)
    }

    /// Write a whole run in one transaction: the run row, merged contacts,
    /// review queue and audit entries. On error nothing of the run remains.
    /// Returns the run id and the number of rows written below the run row.
    pub fn commit_run(&self, commit: &RunCommit<'_>) -> Result<(i64, usize)> {
        let tx = self.connection().unchecked_transaction()?;
        let run_id = insert_run(&tx, commit.source_ids)?;
        let mut rows = insert_contact_rows(&tx, run_id, commit.contacts)?;
        rows += insert_review_rows(&tx, run_id, commit.review_items)?;
        rows += insert_audit_rows(&tx, run_id, commit.audit_entries)?;
        finish_run(&tx, run_id, commit.counts)?;
        tx.commit()?;
        debug!("Committed run {} ({} rows)", run_id, rows);
        Ok((run_id, rows))
    }

    pub fn get_latest_run_id(&self) -> Result<Option<i64>> {
        match self.connection().query_row(
            "SELECT id FROM run WHERE status = 'completed' ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_run(&self, run_id: i64) -> Result<Option<RunSummary>> {
        match self.connection().query_row(
            "SELECT id, started_at, completed_at, status, sources, records_ingested, \
             records_skipped, records_unfixable, merged_contacts, review_items \
             FROM run WHERE id = ?1",
            params![run_id],
            |row| {
                Ok(RunSummary {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    completed_at: row.get(2)?,
                    status: row.get(3)?,
                    sources: row.get(4)?,
                    counts: RunCounts {
                        records_ingested: row.get(5)?,
                        records_skipped: row.get(6)?,
                        records_unfixable: row.get(7)?,
                        merged_contacts: row.get(8)?,
                        review_items: row.get(9)?,
                    },
                })
            },
        ) {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── Audit Entries ────────────────────────────────────────────

    pub fn insert_audit_entries(&self, run_id: i64, entries: &[AuditEntry]) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let count = insert_audit_rows(&tx, run_id, entries)?;
        tx.commit()?;
        debug!("Inserted {} audit entries for run {}", count, run_id);
        Ok(count)
    }

    /// Every logged decision about `subject_id`, oldest first, across runs.
    pub fn audit_entries_for_subject(&self, subject_id: &str) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.connection().prepare(
            "SELECT ae.seq, ae.timestamp, ae.actor, ae.action, ae.subject_ids, \
                    ae.before_json, ae.after_json, ae.rationale \
             FROM audit_entry ae \
             JOIN audit_subject s ON s.entry_id = ae.id \
             WHERE s.subject_id = ?1 \
             ORDER BY ae.run_id, ae.seq",
        )?;
        let entries = stmt
            .query_map(params![subject_id], read_audit_entry)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn audit_entries_for_run(&self, run_id: i64, action: Option<AuditAction>) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.connection().prepare(
            "SELECT seq, timestamp, actor, action, subject_ids, before_json, after_json, rationale \
             FROM audit_entry WHERE run_id = ?1 AND (?2 IS NULL OR action = ?2) ORDER BY seq",
        )?;
        let entries = stmt
            .query_map(params![run_id, action.map(|a| a.as_str())], read_audit_entry)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    // ── Merged Contacts ──────────────────────────────────────────

    pub fn insert_merged_contacts(&self, run_id: i64, contacts: &[MergedContact]) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let count = insert_contact_rows(&tx, run_id, contacts)?;
        tx.commit()?;
        debug!("Inserted {} merged contacts for run {}", count, run_id);
        Ok(count)
    }

    pub fn merged_contacts(&self, run_id: i64) -> Result<Vec<StoredContact>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, run_id, contact_id, display_name, source_ids, record_ids, vcard, conflict_count \
             FROM merged_contact WHERE run_id = ?1 ORDER BY display_name, contact_id",
        )?;
        let contacts = stmt
            .query_map(params![run_id], |row| {
                let sources: String = row.get(4)?;
                let records: String = row.get(5)?;
                Ok(StoredContact {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    contact_id: row.get(2)?,
                    display_name: row.get(3)?,
                    source_ids: from_json(&sources),
                    record_ids: from_json(&records),
                    vcard: row.get(6)?,
                    conflict_count: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(contacts)
    }

    // ── Review Queue ─────────────────────────────────────────────

    pub fn insert_review_items(&self, run_id: i64, items: &[ReviewQueueItem]) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let count = insert_review_rows(&tx, run_id, items)?;
        tx.commit()?;
        debug!("Queued {} review items for run {}", count, run_id);
        Ok(count)
    }

    pub fn review_items(&self, run_id: i64) -> Result<Vec<ReviewQueueItem>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, kind, subject_ids, score, detail, status \
             FROM review_item WHERE run_id = ?1 ORDER BY kind, id",
        )?;
        let items = stmt
            .query_map(params![run_id], |row| {
                let kind: String = row.get(1)?;
                let subjects: String = row.get(2)?;
                Ok(ReviewQueueItem {
                    id: row.get(0)?,
                    kind: ReviewKind::parse(&kind).ok_or_else(|| {
                        rusqlite::Error::InvalidColumnType(1, kind.clone(), rusqlite::types::Type::Text)
                    })?,
                    subject_ids: from_json(&subjects),
                    score: row.get(3)?,
                    detail: row.get(4)?,
                    status: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(items)
    }
}

// ── Row writers ──────────────────────────────────────────────────
// These run on whatever connection or transaction they are handed and never
// commit on their own.

fn insert_run(conn: &Connection, source_ids: &[String]) -> Result<i64> {
    let mut sorted = source_ids.to_vec();
    sorted.sort();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO run (started_at, status, sources) VALUES (?1, 'running', ?2)",
        params![now, to_json(&sorted)],
    )?;
    Ok(conn.last_insert_rowid())
}

fn finish_run(conn: &Connection, run_id: i64, counts: &RunCounts) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE run SET completed_at = ?1, status = 'completed', records_ingested = ?2, \
         records_skipped = ?3, records_unfixable = ?4, merged_contacts = ?5, \
         review_items = ?6 WHERE id = ?7",
        params![
            now,
            counts.records_ingested,
            counts.records_skipped,
            counts.records_unfixable,
            counts.merged_contacts,
            counts.review_items,
            run_id
        ],
    )?;
    Ok(())
}

fn insert_audit_rows(conn: &Connection, run_id: i64, entries: &[AuditEntry]) -> Result<usize> {
    let mut entry_stmt = conn.prepare_cached(
        "INSERT INTO audit_entry \
         (run_id, seq, timestamp, actor, action, subject_ids, before_json, after_json, rationale) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let mut subject_stmt =
        conn.prepare_cached("INSERT INTO audit_subject (entry_id, subject_id) VALUES (?1, ?2)")?;
    let mut count = 0;
    for entry in entries {
        entry_stmt.execute(params![
            run_id,
            entry.seq as i64,
            entry.timestamp.to_rfc3339(),
            to_json(&entry.actor),
            entry.action.as_str(),
            to_json(&entry.subject_ids),
            entry.before.as_ref().map(to_json),
            entry.after.as_ref().map(to_json),
            entry.rationale,
        ])?;
        let entry_id = conn.last_insert_rowid();
        for subject in &entry.subject_ids {
            subject_stmt.execute(params![entry_id, subject])?;
        }
        count += 1;
    }
    Ok(count)
}

fn insert_contact_rows(conn: &Connection, run_id: i64, contacts: &[MergedContact]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO merged_contact \
         (run_id, contact_id, display_name, source_ids, record_ids, vcard, provenance, conflict_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    let mut count = 0;
    for contact in contacts {
        let sources: Vec<&str> = contact
            .contributing_source_ids
            .iter()
            .map(|s| s.as_str())
            .collect();
        let records: Vec<&str> = contact
            .contributing_record_ids
            .iter()
            .map(|r| r.as_str())
            .collect();
        count += stmt.execute(params![
            run_id,
            contact.id,
            contact.display_name(),
            to_json(&sources),
            to_json(&records),
            vcard::write_record(&contact.record),
            to_json(&contact.field_provenance),
            contact.review_flags.len() as i64,
        ])?;
    }
    Ok(count)
}

fn insert_review_rows(conn: &Connection, run_id: i64, items: &[ReviewQueueItem]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO review_item (run_id, kind, subject_ids, score, detail, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut count = 0;
    for item in items {
        count += stmt.execute(params![
            run_id,
            item.kind.as_str(),
            to_json(&item.subject_ids),
            item.score,
            item.detail,
            item.status,
        ])?;
    }
    Ok(count)
}

fn read_audit_entry(row: &Row<'_>) -> Result<AuditEntry> {
    let timestamp: String = row.get(1)?;
    let actor: String = row.get(2)?;
    let action: String = row.get(3)?;
    let subjects: String = row.get(4)?;
    let before: Option<String> = row.get(5)?;
    let after: Option<String> = row.get(6)?;

    let parse_json = |index: usize, text: Option<String>| -> Result<Option<serde_json::Value>> {
        text.map(|t| serde_json::from_str(&t).map_err(|e| json_error(index, e)))
            .transpose()
    };

    Ok(AuditEntry {
        seq: row.get::<_, i64>(0)? as u64,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?,
        actor: serde_json::from_str(&actor).map_err(|e| json_error(2, e))?,
        action: AuditAction::parse(&action).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(3, action.clone(), rusqlite::types::Type::Text)
        })?,
        subject_ids: from_json(&subjects),
        before: parse_json(5, before)?,
        after: parse_json(6, after)?,
        rationale: row.get(7)?,
    })
}

impl AuditSink for Database {
    fn write_entries(&self, run_id: i64, entries: &[AuditEntry]) -> std::result::Result<usize, crate::Error> {
        Ok(self.insert_audit_entries(run_id, entries)?)
    }
}
