//! Persistent catalog of backed up directories and backup runs.
//!
//! A single SQLite file with two tables, `directories` and `backups`, joined by
//! `backups.directory_id`. Each run writes one row to each table inside one
//! transaction; rows are never updated or deleted afterwards.

use crate::backup::archive::BackupArchive;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithFnName, WithMsg};
use crate::backup::source::SourceDirectory;

use chrono::{DateTime, Local};
use function_name::named;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};

use std::path::Path;
use std::time::Duration;

/// Catalog file used when the configuration names none.
pub static DEFAULT_CATALOG_FILE: &str = "backups.db";

static BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS directories (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL,
    path  TEXT NOT NULL,
    size  INTEGER,
    date  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS backups (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    directory_id       INTEGER NOT NULL REFERENCES directories(id),
    backup_name        TEXT NOT NULL,
    backup_path        TEXT NOT NULL,
    backup_size        INTEGER,
    backup_date        TEXT NOT NULL,
    compressed         INTEGER NOT NULL,
    compression_format TEXT,
    compressed_size    INTEGER
);
CREATE INDEX IF NOT EXISTS backups_directory_id ON backups (directory_id);
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub size: Option<u64>,
    pub date: DateTime<Local>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupRecord {
    pub id: i64,
    pub directory_id: i64,
    pub backup_name: String,
    /// Backup root the archive or copy was written under.
    pub backup_path: String,
    pub backup_size: Option<u64>,
    pub backup_date: DateTime<Local>,
    pub compressed: bool,
    pub compression_format: Option<String>,
    pub compressed_size: Option<u64>,
}

fn size_to_sql(size: Option<u64>) -> Option<i64> {
    size.map(|s| i64::try_from(s).unwrap_or(i64::MAX))
}

fn size_from_sql(size: Option<i64>) -> Option<u64> {
    size.map(|s| u64::try_from(s).unwrap_or(0))
}

impl DirectoryRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            path: row.get("path")?,
            size: size_from_sql(row.get("size")?),
            date: row.get("date")?,
        })
    }
}

impl BackupRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            directory_id: row.get("directory_id")?,
            backup_name: row.get("backup_name")?,
            backup_path: row.get("backup_path")?,
            backup_size: size_from_sql(row.get("backup_size")?),
            backup_date: row.get("backup_date")?,
            compressed: row.get("compressed")?,
            compression_format: row.get("compression_format")?,
            compressed_size: size_from_sql(row.get("compressed_size")?),
        })
    }
}

/// An open catalog connection, scoped to one pipeline run.
///
/// Dropping the handle releases the connection; [`CatalogHandle::close`] does
/// the same but reports failures.
#[derive(Debug)]
pub struct CatalogHandle {
    conn: Connection,
}

impl CatalogHandle {
    /// Opens (creating if needed) the catalog file at `path`.
    #[named]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Opening catalog {:?}", path);
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::from)
        .and_then(Self::configure)
        .with_msg(format!("Opening catalog {:?} failed", path))
        .with_fn_name(function_path!())
    }

    pub fn open_in_memory() -> Result<Self> {
        Connection::open_in_memory()
            .map_err(Error::from)
            .and_then(Self::configure)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Creates both tables if they are missing. Never alters existing ones.
    #[named]
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .map_err(Error::from)
            .with_fn_name(function_path!())
    }

    /// Inserts the directory row and the backup row referencing it as one unit.
    ///
    /// Either both rows become visible or, on any failure, neither does.
    #[named]
    pub fn record_backup(
        &mut self,
        source: &SourceDirectory,
        archive: &BackupArchive,
    ) -> Result<(DirectoryRecord, BackupRecord)> {
        let tx = self
            .conn
            .transaction()
            .map_err(Error::from)
            .with_fn_name(function_path!())?;

        let directory = insert_directory(&tx, source).with_fn_name(function_path!())?;
        let backup = insert_backup(&tx, directory.id, archive).with_fn_name(function_path!())?;

        tx.commit()
            .map_err(Error::from)
            .with_fn_name(function_path!())?;
        tracing::info!(
            "Recorded backup {} (id {}) for directory {:?} (id {})",
            backup.backup_name,
            backup.id,
            directory.path,
            directory.id
        );

        Ok((directory, backup))
    }

    pub fn directory(&self, id: i64) -> Result<Option<DirectoryRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, path, size, date FROM directories WHERE id = ?1",
                params![id],
                DirectoryRecord::from_row,
            )
            .optional()
            .map_err(Error::CatalogRead)
    }

    pub fn list_directories(&self) -> Result<Vec<DirectoryRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, path, size, date FROM directories ORDER BY id")
            .map_err(Error::CatalogRead)?;
        let rows = stmt
            .query_map([], DirectoryRecord::from_row)
            .map_err(Error::CatalogRead)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::CatalogRead)
    }

    /// Backups recorded against one directory row, oldest first.
    pub fn backups_for_directory(&self, directory_id: i64) -> Result<Vec<BackupRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, directory_id, backup_name, backup_path, backup_size, backup_date, \
                 compressed, compression_format, compressed_size \
                 FROM backups WHERE directory_id = ?1 ORDER BY id",
            )
            .map_err(Error::CatalogRead)?;
        let rows = stmt
            .query_map(params![directory_id], BackupRecord::from_row)
            .map_err(Error::CatalogRead)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::CatalogRead)
    }

    /// Row counts of `(directories, backups)`.
    pub fn count_rows(&self) -> Result<(u64, u64)> {
        self.conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM directories), (SELECT COUNT(*) FROM backups)",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .map(|(d, b)| (d.max(0) as u64, b.max(0) as u64))
            .map_err(Error::CatalogRead)
    }

    /// Releases the connection now, reporting anything SQLite refuses to flush.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| Error::from(e).with_msg("Closing catalog failed"))
    }
}

fn insert_directory(tx: &Transaction<'_>, source: &SourceDirectory) -> Result<DirectoryRecord> {
    let name = source.safe_name().clone();
    let path = source.path().to_string_lossy().into_owned();
    let size = source.size_bytes();
    let date = source.modified_at();

    tx.execute(
        "INSERT INTO directories (name, path, size, date) VALUES (?1, ?2, ?3, ?4)",
        params![name, path, size_to_sql(size), date],
    )?;

    Ok(DirectoryRecord {
        id: tx.last_insert_rowid(),
        name,
        path,
        size,
        date,
    })
}

fn insert_backup(
    tx: &Transaction<'_>,
    directory_id: i64,
    archive: &BackupArchive,
) -> Result<BackupRecord> {
    let backup_name = archive.backup_name().clone();
    let backup_path = archive.backup_root().to_string_lossy().into_owned();
    let size = archive.output_size_bytes();
    let backup_date = archive.created_at();
    let compressed = archive.compressed();
    let compression_format = archive.compression_label().map(str::to_string);

    tx.execute(
        "INSERT INTO backups (directory_id, backup_name, backup_path, backup_size, backup_date, \
         compressed, compression_format, compressed_size) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            directory_id,
            backup_name,
            backup_path,
            size_to_sql(size),
            backup_date,
            compressed,
            compression_format,
            size_to_sql(size),
        ],
    )?;

    Ok(BackupRecord {
        id: tx.last_insert_rowid(),
        directory_id,
        backup_name,
        backup_path,
        backup_size: size,
        backup_date,
        compressed,
        compression_format,
        compressed_size: size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::{build, CompressionFormat};
    use crate::backup::source::inspect;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample_run(temp_dir: &TempDir) -> (Arc<SourceDirectory>, BackupArchive) {
        let root = temp_dir.path().join("Notes");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), "hello").unwrap();
        std::fs::write(root.join("sub/b.txt"), "abc").unwrap();
        let source = Arc::new(inspect(&root, true).unwrap());
        let archive = build(
            source.clone(),
            true,
            CompressionFormat::Zip,
            temp_dir.path().join("backups"),
        )
        .unwrap();
        (source, archive)
    }

    fn catalog() -> CatalogHandle {
        let catalog = CatalogHandle::open_in_memory().unwrap();
        catalog.ensure_schema().unwrap();
        catalog
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let catalog = catalog();
        catalog.ensure_schema().unwrap();
        catalog.ensure_schema().unwrap();
        assert_eq!(catalog.count_rows().unwrap(), (0, 0));
    }

    #[test]
    fn test_record_backup_inserts_linked_rows() {
        let temp_dir = TempDir::new().unwrap();
        let (source, archive) = sample_run(&temp_dir);
        let mut catalog = catalog();

        let (directory, backup) = catalog.record_backup(&source, &archive).unwrap();

        assert_eq!(directory.name, "Notes");
        assert_eq!(directory.size, Some(8));
        assert_eq!(backup.directory_id, directory.id);
        assert!(backup.compressed);
        assert_eq!(backup.compression_format.as_deref(), Some("zip"));
        assert_eq!(backup.compressed_size, archive.output_size_bytes());
        assert_eq!(backup.backup_size, archive.output_size_bytes());
        assert_eq!(catalog.count_rows().unwrap(), (1, 1));

        assert_eq!(catalog.directory(directory.id).unwrap(), Some(directory.clone()));
        assert_eq!(catalog.backups_for_directory(directory.id).unwrap(), vec![backup]);
    }

    #[test]
    fn test_each_run_inserts_a_fresh_directory_row() {
        let temp_dir = TempDir::new().unwrap();
        let (source, archive) = sample_run(&temp_dir);
        let mut catalog = catalog();

        let (first, _) = catalog.record_backup(&source, &archive).unwrap();
        let (second, _) = catalog.record_backup(&source, &archive).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.path, second.path);
        assert_eq!(catalog.list_directories().unwrap().len(), 2);
        assert_eq!(catalog.backups_for_directory(first.id).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_backup_insert_rolls_back_directory_row() {
        let temp_dir = TempDir::new().unwrap();
        let (source, archive) = sample_run(&temp_dir);
        let mut catalog = catalog();
        catalog
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_backups BEFORE INSERT ON backups \
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let err = catalog.record_backup(&source, &archive).unwrap_err();

        assert!(matches!(err.root(), Error::CatalogWrite(_)));
        assert_eq!(catalog.count_rows().unwrap(), (0, 0));
    }

    #[test]
    fn test_foreign_key_is_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let (_, archive) = sample_run(&temp_dir);
        let mut catalog = catalog();

        let tx = catalog.conn.transaction().unwrap();
        let err = insert_backup(&tx, 4242, &archive).unwrap_err();
        drop(tx);

        assert!(matches!(err, Error::CatalogWrite(_)));
        assert_eq!(catalog.count_rows().unwrap(), (0, 0));
    }

    #[test]
    fn test_record_backup_without_schema_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (source, archive) = sample_run(&temp_dir);
        let mut catalog = CatalogHandle::open_in_memory().unwrap();

        let err = catalog.record_backup(&source, &archive).unwrap_err();
        assert!(matches!(err.root(), Error::CatalogWrite(_)));
    }

    #[test]
    fn test_uncompressed_backup_has_null_format() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("Plain");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("x.txt"), "x").unwrap();
        let source = Arc::new(inspect(&root, false).unwrap());
        let archive = build(
            source.clone(),
            false,
            CompressionFormat::Zip,
            temp_dir.path().join("backups"),
        )
        .unwrap();
        let mut catalog = catalog();

        let (directory, backup) = catalog.record_backup(&source, &archive).unwrap();

        assert_eq!(directory.size, None);
        assert!(!backup.compressed);
        assert_eq!(backup.compression_format, None);
        assert_eq!(backup.compressed_size, None);
    }

    #[test]
    fn test_catalog_file_persists_between_handles() {
        let temp_dir = TempDir::new().unwrap();
        let (source, archive) = sample_run(&temp_dir);
        let db_path = temp_dir.path().join("catalog.db");

        let mut catalog = CatalogHandle::open(&db_path).unwrap();
        catalog.ensure_schema().unwrap();
        catalog.record_backup(&source, &archive).unwrap();
        catalog.close().unwrap();

        let catalog = CatalogHandle::open(&db_path).unwrap();
        catalog.ensure_schema().unwrap();
        assert_eq!(catalog.count_rows().unwrap(), (1, 1));
    }
}
