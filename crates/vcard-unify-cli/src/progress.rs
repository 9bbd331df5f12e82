use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;
use vcard_unify_core::ProgressReporter;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Ingest, match, merge and commit: spinner
/// - Fix: progress bar (record count known after ingest)
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }

    fn spinner(&self, message: &'static str) {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICKS));
        }
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn done(&self, message: String) {
        self.finish_bar();
        eprintln!("  {} {}", "✓".green(), message);
    }
}

impl ProgressReporter for CliReporter {
    fn on_ingest_start(&self) {
        self.spinner("Reading source exports...");
    }

    fn on_ingest_complete(&self, records: usize, skipped: usize, duration_secs: f64) {
        self.done(format!(
            "Ingest complete: {} records, {} skipped in {:.2}s",
            records, skipped, duration_secs
        ));
    }

    fn on_fix_start(&self, total_records: usize) {
        let pb = ProgressBar::new(total_records as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.cyan} Fixing [{bar:30.cyan/dim}] {pos}/{len} records ({eta} remaining)",
        ) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICKS));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_fix_progress(&self, records_done: usize, _total_records: usize) {
        let guard = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pb) = guard.as_ref() {
            pb.set_position(records_done as u64);
        }
    }

    fn on_fix_complete(&self, fixed: usize, unfixable: usize, duration_secs: f64) {
        self.done(format!(
            "Fix complete: {} records, {} unfixable in {:.2}s",
            fixed, unfixable, duration_secs
        ));
    }

    fn on_match_start(&self, _total_records: usize) {
        self.spinner("Scoring cross-source pairs...");
    }

    fn on_match_complete(&self, candidates: usize, groups: usize, duration_secs: f64) {
        self.done(format!(
            "Matching complete: {} candidates, {} auto-merge groups in {:.2}s",
            candidates, groups, duration_secs
        ));
    }

    fn on_merge_start(&self, _total_groups: usize) {
        self.spinner("Merging contacts...");
    }

    fn on_merge_complete(&self, contacts: usize, conflicts: usize, duration_secs: f64) {
        self.done(format!(
            "Merge complete: {} contacts, {} with conflicts in {:.2}s",
            contacts, conflicts, duration_secs
        ));
    }

    fn on_commit_start(&self) {
        self.spinner("Writing output and database...");
    }

    fn on_commit_complete(&self, rows: usize, duration_secs: f64) {
        self.done(format!(
            "Commit complete: {} rows in {:.2}s",
            rows, duration_secs
        ));
    }
}
