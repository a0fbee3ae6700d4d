use rusqlite::{Connection, Result};
use std::sync::Mutex;

use crate::db::migration_runner::MigrationRunner;

pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL lets the UI keep reading while the assistant queries
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::migrate(conn, db_path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::migrate(Connection::open_in_memory()?, ":memory:")
    }

    fn migrate(conn: Connection, db_path: &str) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let runner = MigrationRunner::new();

        log::info!("=== Starting database migration check ===");
        log::info!("Current schema version: {:?}", runner.get_current_version(&conn)?);

        let applied = runner.run_pending_migrations(&conn, db_path)?;
        if applied > 0 {
            log::info!("✅ Applied {} migrations successfully", applied);
        } else {
            log::info!("✅ Database schema is up to date");
        }

        runner.verify_migrations(&conn)?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }
}
