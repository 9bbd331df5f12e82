use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "vcard-unify")]
#[command(about = "Repair vCard exports and merge contacts across sources", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full pipeline over the configured sources
    Process,
    /// Validate and fix one export file without merging anything
    Validate {
        /// vCard export to check
        file: PathBuf,
        /// Source id the records are attributed to
        #[arg(long, default_value = "adhoc")]
        source: String,
    },
    /// Show the manual review queue of the latest run
    Review {
        /// Also write the queue to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Show every logged decision about a record, source record or contact id
    Audit {
        subject: String,
    },
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}
