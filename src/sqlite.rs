use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction};
use tracing::{debug, info, warn};

/// One step of a schema upgrade. Index `n` in a migration list moves the
/// database from version `n` to `n + 1`.
pub(crate) type Migration = fn(&Transaction<'_>) -> Result<()>;

/// Marker attached as context when a migration step fails, so callers can
/// tell a broken upgrade apart from an unavailable medium.
#[derive(Debug, thiserror::Error)]
#[error("schema upgrade to version {version} failed for {path}")]
pub(crate) struct SchemaUpgradeFailed {
    pub version: i64,
    pub path: String,
}

/// A single SQLite file with its own versioned schema.
pub(crate) struct Database {
    path: PathBuf,
    migrations: &'static [Migration],
    conn: Mutex<Connection>,
}

impl Database {
    pub(crate) fn open(path: &Path, migrations: &'static [Migration]) -> Result<Self> {
        let conn = match prepare_connection(path, migrations) {
            Ok(conn) => conn,
            Err(err) if is_corruption_error(&err) => {
                warn!(path = %path.display(), error = %err, "database file is corrupt, starting fresh");
                backup_corrupt_db_files(path)?;
                prepare_connection(path, migrations)?
            }
            Err(err) => return Err(err),
        };

        Ok(Self {
            path: path.to_path_buf(),
            migrations,
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn schema_version(&self) -> Result<i64> {
        self.run(get_schema_version)
    }

    /// Runs `operation` against the connection. A corrupt database is moved
    /// aside, rebuilt and the operation retried once.
    pub(crate) fn run<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("connection lock poisoned for {}", self.path.display()))?;
        match operation(&conn) {
            Ok(value) => Ok(value),
            Err(err) if is_corruption_error(&err) => {
                warn!(path = %self.path.display(), error = %err, "database corrupted during use, recovering");
                self.recover(&mut conn)?;
                operation(&conn)
            }
            Err(err) => Err(err),
        }
    }

    fn recover(&self, conn: &mut Connection) -> Result<()> {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        let old = std::mem::replace(conn, Connection::open_in_memory()?);
        drop(old);
        backup_corrupt_db_files(&self.path)?;
        *conn = prepare_connection(&self.path, self.migrations)?;
        Ok(())
    }
}

fn prepare_connection(path: &Path, migrations: &'static [Migration]) -> Result<Connection> {
    let mut conn = create_connection(path)?;
    apply_migrations(&mut conn, path, migrations)?;
    Ok(conn)
}

fn create_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )
    .with_context(|| format!("failed to open {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

fn apply_migrations(
    conn: &mut Connection,
    path: &Path,
    migrations: &'static [Migration],
) -> Result<()> {
    create_schema_version_table(conn)?;
    let mut version = get_schema_version(conn)?;
    let current = migrations.len() as i64;

    if version > current {
        debug!(path = %path.display(), version, current, "schema is newer than this build");
    }

    while version < current {
        let target = version + 1;
        info!(path = %path.display(), from = version, to = target, "applying schema migration");
        let Ok(index) = usize::try_from(version) else {
            bail!(
                "invalid schema version {version} in {}",
                path.display()
            );
        };
        let tx = conn.transaction()?;
        run_step(tx, migrations[index], target).with_context(|| {
            SchemaUpgradeFailed {
                version: target,
                path: path.display().to_string(),
            }
        })?;
        version = target;
    }

    Ok(())
}

fn run_step(tx: Transaction<'_>, step: Migration, target: i64) -> Result<()> {
    step(&tx)?;
    set_schema_version(&tx, target)?;
    tx.commit()?;
    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn
        .query_row(
            "SELECT version FROM schema_version WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

fn set_schema_version(tx: &Transaction<'_>, version: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO schema_version(id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        [version],
    )?;
    Ok(())
}

fn backup_corrupt_db_files(db_file: &Path) -> Result<()> {
    let stamp = unix_timestamp();
    for file in [
        db_file.to_path_buf(),
        PathBuf::from(format!("{}-wal", db_file.display())),
        PathBuf::from(format!("{}-shm", db_file.display())),
    ] {
        if file.exists() {
            let backup = PathBuf::from(format!("{}.corrupt.{stamp}", file.display()));
            std::fs::rename(&file, &backup).with_context(|| {
                format!(
                    "failed to move corrupt database file from {} to {}",
                    file.display(),
                    backup.display()
                )
            })?;
        }
    }
    Ok(())
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn sqlite_code(cause: &(dyn std::error::Error + 'static)) -> Option<ErrorCode> {
    match cause.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(code, _)) => Some(code.code),
        _ => None,
    }
}

pub(crate) fn is_corruption_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(code) = sqlite_code(cause) {
            return code == ErrorCode::DatabaseCorrupt || code == ErrorCode::NotADatabase;
        }

        let msg = cause.to_string().to_lowercase();
        msg.contains("database disk image is malformed")
    })
}

pub(crate) fn is_storage_full(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| sqlite_code(cause) == Some(ErrorCode::DiskFull))
}
