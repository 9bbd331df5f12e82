mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::Path;
use std::process;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{error, info, warn};
use vcard_unify_core::storage::{Database, ReviewQueueItem};
use vcard_unify_core::{AppConfig, SourceId, UnifyEngine};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match vcard_unify_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Process) => run_process(&config),
        Some(Commands::Validate { file, source }) => run_validate(&config, &file, &source),
        Some(Commands::Review { csv }) => run_review(&config, csv.as_deref()),
        Some(Commands::Audit { subject }) => run_audit(&config, &subject),
        Some(Commands::PrintConfig) => print_config(&config),
        Some(Commands::TruncateDb) => run_truncate(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run_process(config: &AppConfig) -> Result<()> {
    let engine = UnifyEngine::new(config.clone());
    let reporter = CliReporter::new();
    let result = engine.run(&reporter)?;

    println!();
    info!(
        "Ingest: {}, Fix: {}, Match: {}, Merge: {}, Commit: {}",
        format!("{:.2}s", result.ingest_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.fix_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.match_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.merge_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.commit_duration.as_secs_f64()).green(),
    );
    info!(
        "{} records in, {} skipped, {} unfixable",
        format!("{}", result.counts.records_ingested).cyan(),
        format!("{}", result.counts.records_skipped).yellow(),
        format!("{}", result.counts.records_unfixable).red(),
    );
    info!(
        "{} merged contacts ({} auto-merge groups), {} review items, {} audit entries",
        format!("{}", result.counts.merged_contacts).cyan(),
        format!("{}", result.auto_merge_groups).cyan(),
        format!("{}", result.counts.review_items).yellow(),
        result.audit_entries,
    );
    info!(
        "Run {} written to {}",
        result.run_id,
        result.output_path.display()
    );

    Ok(())
}

fn run_validate(config: &AppConfig, file: &Path, source: &str) -> Result<()> {
    let engine = UnifyEngine::new(config.clone());
    let checks = engine
        .check_file(file, &SourceId::new(source))
        .with_context(|| format!("checking {}", file.display()))?;

    let mut failures = 0;
    for check in &checks {
        match &check.outcome {
            Err(err) => {
                failures += 1;
                println!("{} {} {}", check.origin, "unparseable".red(), err);
            }
            Ok(checked) => match &checked.fix {
                Err(unfixable) => {
                    failures += 1;
                    println!("{} {} {}", check.origin, "unfixable".red(), unfixable);
                }
                Ok(fixed) => {
                    let status = if fixed.changed() {
                        format!("fixed in {} step(s)", fixed.steps.len()).yellow()
                    } else {
                        "valid".green()
                    };
                    println!(
                        "{} {} {} ({})",
                        check.origin,
                        fixed.record.formatted_name().unwrap_or_default(),
                        status,
                        checked.initial.summary()
                    );
                    for step in &fixed.steps {
                        println!("    {}: {}", step.stage.as_str(), step.description);
                    }
                    if fixed.report.soft().next().is_some() {
                        println!("    remaining: {}", fixed.report.summary().yellow());
                    }
                }
            },
        }
    }

    info!(
        "{} records checked, {} need manual handling",
        checks.len(),
        format!("{}", failures).red()
    );
    Ok(())
}

fn run_review(config: &AppConfig, csv_path: Option<&Path>) -> Result<()> {
    let db = Database::open(&config.db_path)?;
    let Some(run_id) = db.get_latest_run_id()? else {
        warn!("No completed run in {}", config.db_path);
        return Ok(());
    };
    let items = db.review_items(run_id)?;

    println!("Review queue for run {}: {} item(s)", run_id, items.len());
    for item in &items {
        let score = item
            .score
            .map(|s| format!(" [{}]", s))
            .unwrap_or_default();
        println!(
            "  {:<9}{} {} {}",
            item.kind.as_str().yellow(),
            score,
            item.subject_ids.join(" "),
            item.detail
        );
    }

    if let Some(path) = csv_path {
        write_review_csv(path, &items)?;
        info!("Review queue written to {}", path.display());
    }
    Ok(())
}

fn write_review_csv(path: &Path, items: &[ReviewQueueItem]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["id", "kind", "subjects", "score", "detail", "status"])?;
    for item in items {
        writer.write_record([
            item.id.to_string(),
            item.kind.as_str().to_string(),
            item.subject_ids.join(" "),
            item.score.map(|s| s.to_string()).unwrap_or_default(),
            item.detail.clone(),
            item.status.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn run_audit(config: &AppConfig, subject: &str) -> Result<()> {
    let db = Database::open(&config.db_path)?;
    let entries = db.audit_entries_for_subject(subject)?;
    if entries.is_empty() {
        warn!("No audit entries mention {}", subject);
        return Ok(());
    }
    for entry in &entries {
        println!(
            "#{:<5} {} {:<6} {} {}",
            entry.seq,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action.as_str().cyan(),
            entry.actor,
            entry.rationale
        );
    }
    Ok(())
}

fn print_config(config: &AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("rendering configuration")?;
    println!("{}", rendered);
    Ok(())
}

fn run_truncate(config: &AppConfig) -> Result<()> {
    if !prompt_confirm(
        "Are you SURE you want to COMPLETELY DELETE the Database?",
        Some(false),
    )? {
        return Ok(());
    }
    let db = Database::open(&config.db_path)?;
    db.truncate_all()?;
    println!("All tables truncated");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
