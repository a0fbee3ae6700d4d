use rusqlite::{params, Connection, OptionalExtension, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const BACKUPS_TO_KEEP: usize = 5;
const BACKUP_PREFIX: &str = "pre_migration_";

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

impl Migration {
    pub fn new(version: u32, name: &'static str, sql: &'static str) -> Self {
        Self { version, name, sql }
    }

    /// SHA-256 of the SQL text, stored so edited migrations are caught on startup.
    pub fn checksum(&self) -> String {
        format!("{:x}", Sha256::digest(self.sql.as_bytes()))
    }
}

/// Ordered schema history of the journal database. Version 0 creates the
/// bookkeeping table itself.
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new() -> Self {
        let migrations = vec![
            Migration::new(0, "bootstrap", include_str!("migrations/000_bootstrap.sql")),
            Migration::new(1, "initial_schema", include_str!("migrations/001_initial_schema.sql")),
            Migration::new(
                2,
                "add_assistant_settings",
                include_str!("migrations/002_add_assistant_settings.sql"),
            ),
        ];
        Self { migrations }
    }

    /// Apply every migration newer than the stored version and return how
    /// many ran. Upgrades of an existing on-disk journal take a backup first.
    pub fn run_pending_migrations(&self, conn: &Connection, db_path: &str) -> Result<usize> {
        let current = self.get_current_version(conn)?;
        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| current.is_none_or(|v| m.version > v))
            .collect();

        let Some(target) = pending.last().map(|m| m.version) else {
            return Ok(0);
        };

        match current {
            None => log::info!("Fresh database - applying {} migrations", pending.len()),
            Some(v) => log::info!("Schema at v{}, upgrading to v{}", v, target),
        }

        let backup = match current {
            Some(v) if v > 0 && is_on_disk(db_path) => {
                let path = backup_database(db_path, target)?;
                log::info!("Backup created: {}", path.display());
                Some(path)
            }
            _ => None,
        };

        for migration in &pending {
            self.apply_migration(conn, migration).inspect_err(|e| {
                log::error!("❌ Migration {} failed: {}", migration.version, e);
                if let Some(path) = &backup {
                    log::error!("Backup available at: {}", path.display());
                }
            })?;
            log::info!("✅ Applied migration {}: {}", migration.version, migration.name);
        }

        Ok(pending.len())
    }

    fn apply_migration(&self, conn: &Connection, migration: &Migration) -> Result<()> {
        let started = Instant::now();

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at, checksum, execution_time_ms, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![
                migration.version,
                migration.name,
                unix_now(),
                migration.checksum(),
                started.elapsed().as_millis() as i64
            ],
        )?;
        tx.commit()
    }

    /// Fail if an applied migration's SQL changed since it ran.
    pub fn verify_migrations(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(
            "SELECT version, name, checksum FROM schema_migrations WHERE checksum IS NOT NULL ORDER BY version",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        for row in rows {
            let (version, name, stored) = row?;
            let Some(migration) = self.migrations.iter().find(|m| m.version == version) else {
                continue;
            };
            if stored != migration.checksum() {
                log::error!(
                    "❌ Checksum mismatch for migration {} ({}): stored {}, expected {}",
                    version,
                    name,
                    stored,
                    migration.checksum()
                );
                return Err(rusqlite::Error::InvalidQuery);
            }
        }

        Ok(())
    }

    /// Highest applied version, or `None` before the bootstrap migration ran.
    pub fn get_current_version(&self, conn: &Connection) -> Result<Option<u32>> {
        let has_table: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_migrations')",
            [],
            |row| row.get(0),
        )?;
        if !has_table {
            return Ok(None);
        }

        Ok(conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .optional()?
            .flatten())
    }
}

/// Copy the live database into `backups/` next to it via the online
/// backup API, verify the copy, and prune old copies.
fn backup_database(db_path: &str, target_version: u32) -> Result<PathBuf> {
    let source = Path::new(db_path);
    let backup_dir = source
        .parent()
        .ok_or_else(|| rusqlite::Error::InvalidPath(source.to_path_buf()))?
        .join("backups");
    fs::create_dir_all(&backup_dir)
        .map_err(|e| io_failure(format!("Failed to create backup directory: {}", e)))?;

    let backup_path =
        backup_dir.join(format!("{}v{}_{}.db", BACKUP_PREFIX, target_version, unix_now()));

    let src = Connection::open(source)?;
    let mut dst = Connection::open(&backup_path)?;
    rusqlite::backup::Backup::new(&src, &mut dst)?.run_to_completion(
        5,
        Duration::from_millis(250),
        None,
    )?;

    let integrity: String = dst.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if integrity != "ok" {
        return Err(io_failure(format!("Backup integrity check failed: {}", integrity)));
    }

    prune_backups(&backup_dir, BACKUPS_TO_KEEP);
    Ok(backup_path)
}

fn prune_backups(backup_dir: &Path, keep: usize) {
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Failed to read backup directory: {}", e);
            return;
        }
    };

    let mut backups: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(BACKUP_PREFIX) && name.ends_with(".db"))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect();

    if backups.len() <= keep {
        return;
    }
    backups.sort();
    let excess = backups.len() - keep;
    for (_, path) in backups.into_iter().take(excess) {
        if let Err(e) = fs::remove_file(&path) {
            log::warn!("Failed to delete old backup {}: {}", path.display(), e);
        }
    }
}

fn is_on_disk(db_path: &str) -> bool {
    !db_path.is_empty() && db_path != ":memory:" && !db_path.starts_with("file::memory:")
}

fn io_failure(message: String) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some(message))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
