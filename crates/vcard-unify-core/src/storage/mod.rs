pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::{ReviewKind, ReviewQueueItem, RunCommit, RunCounts, RunSummary, StoredContact};
pub use sqlite::Database;
