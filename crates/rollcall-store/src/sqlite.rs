//! SQLite store for descriptors and attendance.
//!
//! One connection behind a mutex; the daemon routes all store work through
//! blocking tasks, so contention stays off the async runtime. Descriptor
//! vectors are stored as comma-separated text, readable with any SQLite
//! shell.

use chrono::{Local, NaiveDate, SecondsFormat, Utc};
use rollcall_core::store::{AttendanceSink, DescriptorStore, MarkOutcome, StoreError};
use rollcall_core::types::{Embedding, Identity};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS descriptors (
    id         TEXT PRIMARY KEY,
    identity   TEXT NOT NULL,
    name       TEXT NOT NULL,
    features   TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_descriptors_identity ON descriptors(identity);

CREATE TABLE IF NOT EXISTS attendance (
    id        TEXT PRIMARY KEY,
    identity  TEXT NOT NULL,
    day       TEXT NOT NULL,
    marked_at TEXT NOT NULL,
    UNIQUE(identity, day)
);
";

fn read_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::ReadFailed(e.to_string())
}

fn write_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::WriteFailed(e.to_string())
}

/// One enrolled identity as reported by [`SqliteStore::identities`].
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub key: String,
    pub name: String,
    pub descriptors: u64,
    /// Timestamp of the first enrollment (RFC 3339).
    pub enrolled_at: String,
}

/// One attendance row for a day.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEntry {
    pub identity: String,
    /// Display name, `None` once the identity's descriptors were removed.
    pub name: Option<String>,
    pub marked_at: String,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::ReadFailed(format!("open {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "descriptor database opened");
        Self::init(conn)
    }

    /// Fully in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(read_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(write_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Enrolled identities with descriptor counts, in first-enrollment order.
    pub fn identities(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT d.identity,
                        (SELECT name FROM descriptors f
                          WHERE f.identity = d.identity ORDER BY f.rowid LIMIT 1),
                        COUNT(*),
                        MIN(d.created_at)
                 FROM descriptors d
                 GROUP BY d.identity
                 ORDER BY MIN(d.rowid)",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(IdentitySummary {
                    key: row.get(0)?,
                    name: row.get(1)?,
                    descriptors: row.get::<_, i64>(2)? as u64,
                    enrolled_at: row.get(3)?,
                })
            })
            .map_err(read_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(read_err)
    }

    /// Delete all descriptors for an identity, returning how many rows went.
    ///
    /// Attendance history is deliberately kept; the day the person was
    /// present does not un-happen when they are un-enrolled.
    pub fn remove(&self, key: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn
            .execute("DELETE FROM descriptors WHERE identity = ?1", params![key])
            .map_err(write_err)?;
        if removed > 0 {
            tracing::info!(identity = key, rows = removed, "identity removed");
        }
        Ok(removed)
    }

    /// Attendance entries for one calendar day, earliest mark first.
    pub fn attendance_for_day(&self, day: NaiveDate) -> Result<Vec<AttendanceEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT a.identity,
                        (SELECT name FROM descriptors d
                          WHERE d.identity = a.identity ORDER BY d.rowid LIMIT 1),
                        a.marked_at
                 FROM attendance a
                 WHERE a.day = ?1
                 ORDER BY a.marked_at, a.rowid",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![day.to_string()], |row| {
                Ok(AttendanceEntry {
                    identity: row.get(0)?,
                    name: row.get(1)?,
                    marked_at: row.get(2)?,
                })
            })
            .map_err(read_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(read_err)
    }
}

impl DescriptorStore for SqliteStore {
    fn list_all(&self) -> Result<Vec<(Identity, Embedding)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT identity, name, features FROM descriptors ORDER BY rowid")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(read_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (key, name, features) = row.map_err(read_err)?;
            let embedding =
                Embedding::from_text(&features).map_err(|e| StoreError::MalformedRecord {
                    identity: key.clone(),
                    reason: e.to_string(),
                })?;
            out.push((Identity::new(key, name), embedding));
        }
        Ok(out)
    }

    fn append(&self, identity: &Identity, embedding: &Embedding) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO descriptors (id, identity, name, features, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                identity.key,
                identity.name,
                embedding.to_text(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ],
        )
        .map_err(write_err)?;
        Ok(())
    }
}

impl AttendanceSink for SqliteStore {
    /// Mark an identity present for today. At most one row per identity
    /// and day; repeats report [`MarkOutcome::AlreadyMarked`].
    fn record(&self, identity_key: &str) -> Result<MarkOutcome, StoreError> {
        let conn = self.conn.lock().unwrap();
        let enrolled: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM descriptors WHERE identity = ?1)",
                params![identity_key],
                |row| row.get(0),
            )
            .map_err(read_err)?;
        if !enrolled {
            return Err(StoreError::WriteFailed(format!(
                "unknown identity {identity_key}"
            )));
        }

        // Attendance is a local-calendar concept.
        let now = Local::now();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO attendance (id, identity, day, marked_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    identity_key,
                    now.date_naive().to_string(),
                    now.to_rfc3339_opts(SecondsFormat::Secs, true),
                ],
            )
            .map_err(write_err)?;

        if inserted == 0 {
            Ok(MarkOutcome::AlreadyMarked)
        } else {
            tracing::info!(identity = identity_key, "attendance marked");
            Ok(MarkOutcome::Marked)
        }
    }
}
