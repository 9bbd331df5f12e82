/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif bars; library callers can pass
/// `SilentReporter`. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_ingest_start(&self) {}
    fn on_ingest_complete(&self, _records: usize, _skipped: usize, _duration_secs: f64) {}
    fn on_fix_start(&self, _total_records: usize) {}
    fn on_fix_progress(&self, _records_done: usize, _total_records: usize) {}
    fn on_fix_complete(&self, _fixed: usize, _unfixable: usize, _duration_secs: f64) {}
    fn on_match_start(&self, _total_records: usize) {}
    fn on_match_complete(&self, _candidates: usize, _groups: usize, _duration_secs: f64) {}
    fn on_merge_start(&self, _total_groups: usize) {}
    fn on_merge_complete(&self, _contacts: usize, _conflicts: usize, _duration_secs: f64) {}
    fn on_commit_start(&self) {}
    fn on_commit_complete(&self, _rows: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
