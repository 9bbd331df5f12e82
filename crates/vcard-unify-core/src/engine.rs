use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::audit::{AuditAction, AuditEntry, AuditLedger, AuditSink, JsonlSink, RecordSnapshot};
use crate::compliance::{FixedRecord, Fixer, UnfixableRecord, ValidationReport, Validator};
use crate::config::AppConfig;
use crate::error::Error;
use crate::hasher;
use crate::matching::{build_candidates_with, Grouper, GroupingOutcome};
use crate::merge::{MergeResolver, SourcePriority};
use crate::model::{MergedContact, Record, RecordId, SourceId};
use crate::progress::ProgressReporter;
use crate::scanner::{self, RawRecord};
use crate::storage::{Database, ReviewKind, ReviewQueueItem, RunCommit, RunCounts};
use crate::vcard::{self, ParseError};

pub struct UnifyEngine {
    config: AppConfig,
    db_path: String,
}

#[derive(Debug)]
pub struct UnifyResult {
    pub run_id: i64,
    pub ingest_duration: Duration,
    pub fix_duration: Duration,
    pub match_duration: Duration,
    pub merge_duration: Duration,
    pub commit_duration: Duration,
    pub counts: RunCounts,
    pub auto_merge_groups: usize,
    pub audit_entries: usize,
    pub output_path: PathBuf,
    pub contacts: Vec<MergedContact>,
    pub review_queue: Vec<ReviewQueueItem>,
}

/// What one pass of matching and merging decided for a set of fixed records.
#[derive(Debug)]
pub struct Resolution {
    pub outcome: GroupingOutcome,
    pub contacts: Vec<MergedContact>,
    pub review_queue: Vec<ReviewQueueItem>,
}

impl Resolution {
    /// Fingerprint of the grouping and of the exported merge output.
    pub fn fingerprint(&self) -> u64 {
        let exported = vcard::export(&self.contacts);
        let mut parts: Vec<&str> = self
            .outcome
            .auto_merge
            .iter()
            .chain(&self.outcome.review_groups)
            .map(|g| g.id.as_str())
            .collect();
        parts.sort_unstable();
        parts.push(&exported);
        hasher::fingerprint_strs(parts)
    }
}

/// Result of checking one record of an export without merging it.
#[derive(Debug)]
pub struct RecordCheck {
    pub origin: String,
    pub outcome: Result<CheckedRecord, ParseError>,
}

#[derive(Debug)]
pub struct CheckedRecord {
    pub initial: ValidationReport,
    pub fix: Result<FixedRecord, UnfixableRecord>,
}

impl UnifyEngine {
    pub fn new(config: AppConfig) -> Self {
        let db_path = config.db_path.clone();
        Self { config, db_path }
    }

    pub fn with_db_path(mut self, path: &str) -> Self {
        self.db_path = path.to_string();
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run the full unify pipeline:
    /// 1. Discover and parse every source export
    /// 2. Validate and fix each record in parallel
    /// 3. Score cross-source pairs and group them
    /// 4. Merge each group (and pass singletons through)
    /// 5. Export the merged contacts and commit run, ledger and review queue
    ///
    /// Nothing is written before step 5; any earlier error aborts the run. The
    /// database rows land in one transaction, and the previous export is only
    /// replaced once that transaction has committed.
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<UnifyResult, Error> {
        self.config.validate()?;
        let ledger = AuditLedger::new();
        let imported_at = Utc::now();

        // Phase 1: Ingest
        info!("Ingesting {} source(s)...", self.config.sources.len());
        reporter.on_ingest_start();
        let ingest_start = Instant::now();
        let raw = scanner::scan_sources(&self.config.sources, &self.config.ignore_patterns)?;
        let (records, skipped, duplicates) = ingest_records(&raw, imported_at, &ledger);
        let ingest_duration = ingest_start.elapsed();
        reporter.on_ingest_complete(records.len(), skipped, ingest_duration.as_secs_f64());
        debug!(
            "Ingest completed in {:.2}s: {} records, {} skipped",
            ingest_duration.as_secs_f64(),
            records.len(),
            skipped,
        );

        // Phase 2: Fix
        info!("Validating and fixing {} records...", records.len());
        reporter.on_fix_start(records.len());
        let fix_start = Instant::now();
        let fixer = Fixer::new(Validator::new(&self.config.normalization.default_country_code));
        let (fixed, mut review_queue) = fix_records(&fixer, &records, &ledger, reporter);
        let unfixable = review_queue.len();
        review_queue.extend(duplicates);
        let fix_duration = fix_start.elapsed();
        reporter.on_fix_complete(fixed.len(), unfixable, fix_duration.as_secs_f64());
        debug!(
            "Fix completed in {:.2}s: {} fixed, {} unfixable",
            fix_duration.as_secs_f64(),
            fixed.len(),
            unfixable,
        );

        // Phases 3 and 4: Match and merge
        reporter.on_match_start(fixed.len());
        let (resolution, match_duration, merge_duration) =
            self.resolve(&fixed, Some(&ledger), reporter)?;

        if self.config.verify_determinism {
            self.verify_determinism(&fixed, &resolution)?;
        }

        let conflicts = resolution
            .contacts
            .iter()
            .filter(|c| c.has_conflicts())
            .count();
        review_queue.extend(resolution.review_queue);
        let counts = RunCounts {
            records_ingested: records.len() as i64,
            records_skipped: skipped as i64,
            records_unfixable: unfixable as i64,
            merged_contacts: resolution.contacts.len() as i64,
            review_items: review_queue.len() as i64,
        };
        debug!(
            "{} contacts ({} with conflicts), {} review items",
            counts.merged_contacts, conflicts, counts.review_items
        );

        // Phase 5: Export and commit
        info!("Writing output and committing run...");
        reporter.on_commit_start();
        let commit_start = Instant::now();
        let output_path = PathBuf::from(&self.config.output_path);
        let db = Database::open(&self.db_path)?;
        let staged = stage_export(&output_path, &resolution.contacts)?;

        let source_ids: Vec<String> = self.config.sources.iter().map(|s| s.id.clone()).collect();
        let entries = ledger.snapshot();
        let committed = db.commit_run(&RunCommit {
            source_ids: &source_ids,
            contacts: &resolution.contacts,
            review_items: &review_queue,
            audit_entries: &entries,
            counts: &counts,
        });
        let (run_id, rows) = match committed {
            Ok(done) => done,
            Err(err) => {
                warn!("Commit failed, discarding staged export {}", staged.display());
                if let Err(cleanup) = fs::remove_file(&staged) {
                    warn!("Could not remove {}: {}", staged.display(), cleanup);
                }
                return Err(err.into());
            }
        };
        fs::rename(&staged, &output_path)?;
        debug!("Exported {} contacts to {}", resolution.contacts.len(), output_path.display());
        let audit_entries = entries.len();
        if let Some(path) = &self.config.audit_jsonl_path {
            JsonlSink::new(path).write_entries(run_id, &entries)?;
        }
        let commit_duration = commit_start.elapsed();
        reporter.on_commit_complete(rows, commit_duration.as_secs_f64());
        debug!(
            "Commit completed in {:.2}s: run {}, {} rows",
            commit_duration.as_secs_f64(),
            run_id,
            rows,
        );

        Ok(UnifyResult {
            run_id,
            ingest_duration,
            fix_duration,
            match_duration,
            merge_duration,
            commit_duration,
            counts,
            auto_merge_groups: resolution.outcome.auto_merge.len(),
            audit_entries,
            output_path,
            contacts: resolution.contacts,
            review_queue,
        })
    }

    /// Match, group and merge already-fixed records. Decisions are logged to
    /// `ledger` when one is given.
    pub fn resolve_records(&self, fixed: &[Record], ledger: Option<&AuditLedger>) -> Result<Resolution, Error> {
        Ok(self.resolve(fixed, ledger, &crate::progress::SilentReporter)?.0)
    }

    fn resolve(
        &self,
        fixed: &[Record],
        ledger: Option<&AuditLedger>,
        reporter: &dyn ProgressReporter,
    ) -> Result<(Resolution, Duration, Duration), Error> {
        let match_start = Instant::now();
        let candidates = build_candidates_with(
            fixed,
            &self.config.matching,
            &self.config.normalization.default_country_code,
        );
        let outcome = Grouper::new(&self.config.matching).group(&candidates);
        let match_duration = match_start.elapsed();
        reporter.on_match_complete(
            candidates.len(),
            outcome.auto_merge.len(),
            match_duration.as_secs_f64(),
        );
        debug!(
            "Matching completed in {:.2}s: {} candidates, {} groups, {} review items",
            match_duration.as_secs_f64(),
            candidates.len(),
            outcome.auto_merge.len(),
            outcome.needs_review.len(),
        );
        if let Some(ledger) = ledger {
            log_match_decisions(&outcome, ledger);
        }
        let mut review_queue = match_review_items(&outcome);

        let merge_start = Instant::now();
        let resolver = self.merge_resolver();
        let by_id: AHashMap<&RecordId, &Record> = fixed.iter().map(|r| (r.id(), r)).collect();
        let mut units: Vec<Vec<Record>> = outcome
            .auto_merge
            .iter()
            .map(|g| {
                g.members
                    .iter()
                    .filter_map(|id| by_id.get(id).map(|r| (*r).clone()))
                    .collect()
            })
            .collect();
        let grouped: AHashSet<&RecordId> = outcome
            .auto_merge
            .iter()
            .flat_map(|g| g.members.iter())
            .collect();
        units.extend(
            fixed
                .iter()
                .filter(|r| !grouped.contains(r.id()))
                .map(|r| vec![r.clone()]),
        );
        reporter.on_merge_start(units.len());

        let mut contacts = units
            .par_iter()
            .map(|unit| resolver.merge(unit))
            .collect::<Result<Vec<MergedContact>, Error>>()?;
        contacts.sort_by(|a, b| {
            a.display_name()
                .to_lowercase()
                .cmp(&b.display_name().to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });

        for contact in contacts.iter().filter(|c| c.has_conflicts()) {
            for flag in &contact.review_flags {
                review_queue.push(ReviewQueueItem::open(
                    ReviewKind::Conflict,
                    vec![contact.id.clone()],
                    None,
                    flag.to_string(),
                ));
            }
        }
        if let Some(ledger) = ledger {
            log_merge_decisions(&contacts, &by_id, ledger)?;
        }
        let merge_duration = merge_start.elapsed();
        let conflicts = contacts.iter().filter(|c| c.has_conflicts()).count();
        reporter.on_merge_complete(contacts.len(), conflicts, merge_duration.as_secs_f64());
        debug!(
            "Merge completed in {:.2}s: {} contacts",
            merge_duration.as_secs_f64(),
            contacts.len()
        );

        Ok((
            Resolution {
                outcome,
                contacts,
                review_queue,
            },
            match_duration,
            merge_duration,
        ))
    }

    /// Re-run matching and merging on the reversed input and require identical output.
    fn verify_determinism(&self, fixed: &[Record], forward: &Resolution) -> Result<(), Error> {
        let reversed: Vec<Record> = fixed.iter().rev().cloned().collect();
        let backward = self.resolve_records(&reversed, None)?;
        let (first, second) = (forward.fingerprint(), backward.fingerprint());
        if first != second {
            return Err(Error::NonDeterminism {
                stage: "match/merge",
                first: format!("{:016x}", first),
                second: format!("{:016x}", second),
            });
        }
        trace!("Determinism check passed ({:016x})", first);
        Ok(())
    }

    fn merge_resolver(&self) -> MergeResolver {
        let labels: BTreeMap<SourceId, String> = self
            .config
            .sources
            .iter()
            .map(|s| (SourceId::new(&s.id), s.label().to_string()))
            .collect();
        MergeResolver::new(
            SourcePriority::new(self.config.source_priority()),
            &self.config.merge,
            &self.config.normalization.default_country_code,
        )
        .with_labels(labels)
    }

    /// Parse, validate and fix every record of one export file without merging
    /// or committing anything.
    pub fn check_file(&self, path: &Path, source_id: &SourceId) -> Result<Vec<RecordCheck>, Error> {
        let raw = scanner::read_source(source_id, &[path.to_path_buf()])?;
        let fixer = Fixer::new(Validator::new(&self.config.normalization.default_country_code));
        let imported_at = Utc::now();
        Ok(raw
            .par_iter()
            .map(|raw| RecordCheck {
                origin: raw.origin.clone(),
                outcome: vcard::ingest_at(&raw.text, &raw.source_id, imported_at).map(|record| {
                    let initial = fixer.validator().validate(&record);
                    let fix = fixer.fix(&record, &initial);
                    CheckedRecord { initial, fix }
                }),
            })
            .collect())
    }
}

/// Parse raw records. Unparseable chunks and repeated record ids within a source
/// are logged as skips and left out. A repeat whose content differs from the
/// record already kept is snapshotted in the ledger and queued for review.
fn ingest_records(
    raw: &[RawRecord],
    imported_at: DateTime<Utc>,
    ledger: &AuditLedger,
) -> (Vec<Record>, usize, Vec<ReviewQueueItem>) {
    let parsed: Vec<Result<Record, ParseError>> = raw
        .par_iter()
        .map(|r| vcard::ingest_at(&r.text, &r.source_id, imported_at))
        .collect();

    let mut seen: AHashMap<RecordId, usize> = AHashMap::new();
    let mut records: Vec<Record> = Vec::with_capacity(parsed.len());
    let mut queue = Vec::new();
    let mut skipped = 0;
    for (raw, result) in raw.iter().zip(parsed) {
        match result {
            Ok(record) => {
                let Some(&kept) = seen.get(record.id()) else {
                    seen.insert(record.id().clone(), records.len());
                    records.push(record);
                    continue;
                };
                let differs = records[kept].properties() != record.properties();
                trace!("{} repeats {} (differs: {})", raw.origin, record.id(), differs);
                let rationale = if differs {
                    let detail = format!("{} reuses id {} with different content", raw.origin, record.id());
                    warn!("{}", detail);
                    queue.push(ReviewQueueItem::open(
                        ReviewKind::Duplicate,
                        vec![raw.origin.clone(), record.id().to_string()],
                        None,
                        detail,
                    ));
                    "a different record with this id was already imported from this source"
                } else {
                    "a record with this id was already imported from this source"
                };
                ledger.append(
                    AuditEntry::new(
                        AuditAction::Skip,
                        vec![raw.origin.clone(), record.id().to_string()],
                        rationale,
                    )
                    .with_before(snapshot_value(&record)),
                );
                skipped += 1;
            }
            Err(err) => {
                warn!("Skipping {} ({}): {}", raw.origin, raw.path.display(), err);
                ledger.append(AuditEntry::new(
                    AuditAction::Skip,
                    vec![raw.origin.clone()],
                    format!("unparseable record in {}: {}", raw.path.display(), err),
                ));
                skipped += 1;
            }
        }
    }
    (records, skipped, queue)
}

/// Fix every record in parallel. Unfixable records are logged and queued for
/// manual handling instead of being returned.
fn fix_records(
    fixer: &Fixer,
    records: &[Record],
    ledger: &AuditLedger,
    reporter: &dyn ProgressReporter,
) -> (Vec<Record>, Vec<ReviewQueueItem>) {
    let done = AtomicUsize::new(0);
    let results: Vec<Result<FixedRecord, UnfixableRecord>> = records
        .par_iter()
        .map(|record| {
            let result = fixer.fix_record(record);
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            reporter.on_fix_progress(n, records.len());
            result
        })
        .collect();

    let mut fixed = Vec::with_capacity(results.len());
    let mut queue = Vec::new();
    for result in results {
        match result {
            Ok(outcome) => {
                for step in &outcome.steps {
                    ledger.append(
                        AuditEntry::new(
                            AuditAction::Fix,
                            vec![step.after.id().to_string()],
                            format!("{}: {}", step.stage.as_str(), step.description),
                        )
                        .with_before(snapshot_value(&step.before))
                        .with_after(snapshot_value(&step.after)),
                    );
                }
                if outcome.report.soft().next().is_some() {
                    trace!("{} kept soft violations: {}", outcome.record.id(), outcome.report.summary());
                }
                fixed.push(outcome.record);
            }
            Err(unfixable) => {
                warn!("{}", unfixable);
                ledger.append(
                    AuditEntry::new(
                        AuditAction::Skip,
                        vec![unfixable.record_id.to_string()],
                        unfixable.to_string(),
                    )
                    .with_before(snapshot_value(&unfixable.record)),
                );
                queue.push(ReviewQueueItem::open(
                    ReviewKind::Unfixable,
                    vec![unfixable.record_id.to_string()],
                    None,
                    unfixable.to_string(),
                ));
            }
        }
    }
    (fixed, queue)
}

fn snapshot_value(record: &Record) -> serde_json::Value {
    serde_json::to_value(RecordSnapshot::of(record)).unwrap_or(serde_json::Value::Null)
}

fn candidate_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn log_match_decisions(outcome: &GroupingOutcome, ledger: &AuditLedger) {
    for group in &outcome.auto_merge {
        for edge in &group.edges {
            ledger.append(
                AuditEntry::new(
                    AuditAction::Match,
                    vec![edge.left.to_string(), edge.right.to_string()],
                    format!("auto-merge into {}: {}", group.id, edge.describe()),
                )
                .with_after(candidate_value(edge)),
            );
        }
    }
    for group in &outcome.review_groups {
        let mut subjects = vec![group.id.to_string()];
        subjects.extend(group.members.iter().map(|m| m.to_string()));
        ledger.append(AuditEntry::new(
            AuditAction::Match,
            subjects,
            format!("chain of {} records held for review", group.len()),
        ));
    }
    for item in &outcome.needs_review {
        ledger.append(
            AuditEntry::new(
                AuditAction::Match,
                vec![item.candidate.left.to_string(), item.candidate.right.to_string()],
                format!("needs review: {}", item.candidate.describe()),
            )
            .with_after(candidate_value(&item.candidate)),
        );
    }
    for candidate in &outcome.kept_separate {
        ledger.append(
            AuditEntry::new(
                AuditAction::Match,
                vec![candidate.left.to_string(), candidate.right.to_string()],
                format!("kept separate: {}", candidate.describe()),
            )
            .with_after(candidate_value(candidate)),
        );
    }
}

fn match_review_items(outcome: &GroupingOutcome) -> Vec<ReviewQueueItem> {
    let mut items: Vec<ReviewQueueItem> = outcome
        .review_groups
        .iter()
        .map(|group| {
            ReviewQueueItem::open(
                ReviewKind::Group,
                group.members.iter().map(|m| m.to_string()).collect(),
                None,
                format!("{}: {} records linked by auto-merge edges", group.id, group.len()),
            )
        })
        .collect();
    items.extend(outcome.needs_review.iter().map(|item| {
        let mut subjects = vec![item.candidate.left.to_string(), item.candidate.right.to_string()];
        subjects.extend(
            [&item.left_group, &item.right_group]
                .into_iter()
                .flatten()
                .map(|g| g.to_string()),
        );
        subjects.dedup();
        ReviewQueueItem::open(
            ReviewKind::Match,
            subjects,
            Some(i64::from(item.candidate.score)),
            item.candidate.describe(),
        )
    }));
    items
}

fn log_merge_decisions(
    contacts: &[MergedContact],
    by_id: &AHashMap<&RecordId, &Record>,
    ledger: &AuditLedger,
) -> Result<(), Error> {
    for contact in contacts.iter().filter(|c| c.contributing_record_ids.len() > 1) {
        let inputs: Vec<RecordSnapshot> = contact
            .contributing_record_ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|r| RecordSnapshot::of(r))
            .collect();
        let mut subjects = vec![contact.id.clone()];
        subjects.extend(contact.contributing_record_ids.iter().map(|r| r.to_string()));
        let sources: Vec<&str> = contact
            .contributing_source_ids
            .iter()
            .map(|s| s.as_str())
            .collect();
        ledger.append(
            AuditEntry::new(
                AuditAction::Merge,
                subjects,
                format!(
                    "merged {} records from {} ({} conflict(s))",
                    contact.contributing_record_ids.len(),
                    sources.join(", "),
                    contact.review_flags.len()
                ),
            )
            .with_before(serde_json::to_value(inputs)?)
            .with_after(serde_json::to_value(RecordSnapshot::of(&contact.record))?),
        );
    }
    Ok(())
}

/// Write the export next to its final path. The caller renames it into place
/// once the database commit has succeeded.
fn stage_export(path: &Path, contacts: &[MergedContact]) -> Result<PathBuf, Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut staged = path.as_os_str().to_owned();
    staged.push(".tmp");
    let staged = PathBuf::from(staged);
    fs::write(&staged, vcard::export(contacts))?;
    Ok(staged)
}
