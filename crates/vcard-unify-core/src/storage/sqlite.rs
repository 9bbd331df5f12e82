use rusqlite::{Connection, Result};
use tracing::debug;

const SCHEMA_VERSION: i64 = 1;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -16000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 16MB cache)");
        Ok(())
    }

    /// Check schema version and migrate if needed.
    /// Older versions are dropped and recreated; every row is derived from the
    /// source exports and can be rebuilt by re-running.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < SCHEMA_VERSION {
            debug!(
                "Schema version {} < {}, dropping all tables and recreating",
                version, SCHEMA_VERSION
            );
            self.conn.execute_batch(
                "DROP TABLE IF EXISTS review_item;
                 DROP TABLE IF EXISTS merged_contact;
                 DROP TABLE IF EXISTS audit_subject;
                 DROP TABLE IF EXISTS audit_entry;
                 DROP TABLE IF EXISTS run;",
            )?;
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn truncate_all(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM review_item;
             DELETE FROM merged_contact;
             DELETE FROM audit_subject;
             DELETE FROM audit_entry;
             DELETE FROM run;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}
