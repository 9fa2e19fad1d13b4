//! Durable descriptor store.
//!
//! One row per identifier in a SQLite database. The database runs in WAL
//! mode: a single writer connection serializes every write, while each
//! `list()` opens its own read-only connection and reads one consistent
//! snapshot without waiting on the writer.

use crate::identifier::Identifier;
use crate::types::{Descriptor, IdentityRecord};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    identifier TEXT PRIMARY KEY NOT NULL,
    dim        INTEGER NOT NULL,
    descriptor BLOB NOT NULL,
    updated_at TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("corrupt record {identifier:?}: {reason}")]
    Corrupt { identifier: String, reason: String },
    #[error("store writer lock poisoned")]
    Poisoned,
}

/// Persistence of identity records keyed by identifier.
///
/// All methods block; async callers should run them on the blocking pool.
pub trait DescriptorStore: Send + Sync {
    /// Write or overwrite the record for `identifier`.
    fn put(&self, identifier: &Identifier, descriptor: &Descriptor) -> Result<(), StoreError>;

    /// Write the record only if `identifier` is not enrolled yet.
    /// Returns `false` without writing when it already exists.
    fn insert_new(
        &self,
        identifier: &Identifier,
        descriptor: &Descriptor,
    ) -> Result<bool, StoreError>;

    /// Snapshot of every enrolled record.
    fn list(&self) -> Result<Vec<IdentityRecord>, StoreError>;

    /// Number of enrolled records.
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// SQLite-backed [`DescriptorStore`].
pub struct SqliteStore {
    path: PathBuf,
    writer: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or lazily create) the gallery database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(path = %path.display(), journal_mode = %mode, "descriptor store opened");

        Ok(Self {
            path,
            writer: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl DescriptorStore for SqliteStore {
    fn put(&self, identifier: &Identifier, descriptor: &Descriptor) -> Result<(), StoreError> {
        let conn = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO identities (identifier, dim, descriptor, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identifier) DO UPDATE SET
                 dim = excluded.dim,
                 descriptor = excluded.descriptor,
                 updated_at = excluded.updated_at",
            params![
                identifier.as_str(),
                descriptor.dim() as i64,
                descriptor.to_le_bytes(),
                now_rfc3339(),
            ],
        )?;
        tracing::debug!(identifier = %identifier, dim = descriptor.dim(), "record written");
        Ok(())
    }

    fn insert_new(
        &self,
        identifier: &Identifier,
        descriptor: &Descriptor,
    ) -> Result<bool, StoreError> {
        let conn = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let changed = conn.execute(
            "INSERT INTO identities (identifier, dim, descriptor, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identifier) DO NOTHING",
            params![
                identifier.as_str(),
                descriptor.dim() as i64,
                descriptor.to_le_bytes(),
                now_rfc3339(),
            ],
        )?;
        Ok(changed == 1)
    }

    fn list(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let conn = self.reader()?;
        let mut stmt =
            conn.prepare("SELECT identifier, dim, descriptor, updated_at FROM identities")?;
        let rows = stmt.query_map([], |row| {
            Ok(RawRow {
                identifier: row.get(0)?,
                dim: row.get(1)?,
                descriptor: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode()?);
        }
        Ok(records)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

struct RawRow {
    identifier: String,
    dim: i64,
    descriptor: Vec<u8>,
    updated_at: String,
}

impl RawRow {
    fn decode(self) -> Result<IdentityRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            identifier: self.identifier.clone(),
            reason,
        };

        let identifier =
            Identifier::parse(&self.identifier).map_err(|e| corrupt(e.to_string()))?;

        let expected_len = usize::try_from(self.dim)
            .ok()
            .filter(|dim| *dim > 0)
            .and_then(|dim| dim.checked_mul(4));
        if expected_len != Some(self.descriptor.len()) {
            return Err(corrupt(format!(
                "declared dimension {} but blob holds {} bytes",
                self.dim,
                self.descriptor.len()
            )));
        }

        let values = self
            .descriptor
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let descriptor = Descriptor::new(values).map_err(|e| corrupt(e.to_string()))?;

        Ok(IdentityRecord {
            identifier,
            descriptor,
            updated_at: self.updated_at,
        })
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
