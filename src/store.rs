//! Durable record of already-notified messages
//!
//! One row per `(account, uid)` pair. Rows are upserted, so processing
//! the same message twice never creates a second record, and swept by
//! age regardless of which account wrote them.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Default retention window for notified records.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE processed_emails (
            account TEXT NOT NULL,
            uid INTEGER NOT NULL,
            notified INTEGER NOT NULL,
            processed_at INTEGER NOT NULL,
            PRIMARY KEY (account, uid)
        );

        CREATE INDEX idx_processed_emails_processed_at
            ON processed_emails(processed_at);",
    )])
}

/// SQLite-backed dedup store.
///
/// Shared by every session. The connection sits behind a mutex so
/// concurrent sessions never interleave writes.
#[derive(Debug)]
pub struct DedupStore {
    conn: Mutex<Connection>,
}

impl DedupStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::with_connection(conn)
    }

    /// A throwaway store, mostly for tests and `check` runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        migrations().to_latest(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // Statements are atomic; a poisoned lock is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True iff `(account, uid)` has been recorded as notified.
    pub fn is_notified(&self, account: &str, uid: u32) -> Result<bool> {
        let notified = self
            .conn()
            .query_row(
                "SELECT notified FROM processed_emails WHERE account = ?1 AND uid = ?2",
                params![account, uid],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(notified.unwrap_or(false))
    }

    /// Record `(account, uid)` as notified now. Idempotent.
    pub fn mark_notified(&self, account: &str, uid: u32) -> Result<()> {
        self.mark_notified_at(account, uid, Utc::now())
    }

    /// Record `(account, uid)` as notified at `at`. The latest call wins.
    pub fn mark_notified_at(&self, account: &str, uid: u32, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO processed_emails (account, uid, notified, processed_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT (account, uid)
             DO UPDATE SET notified = 1, processed_at = excluded.processed_at",
            params![account, uid, at.timestamp()],
        )?;
        Ok(())
    }

    /// Delete every record older than `retention`, for all accounts.
    /// Returns the number of deleted records.
    pub fn sweep_older_than(&self, retention: Duration) -> Result<usize> {
        self.sweep_older_than_at(retention, Utc::now())
    }

    /// Same as [`Self::sweep_older_than`] with an explicit clock.
    pub fn sweep_older_than_at(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize> {
        let retention = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp().saturating_sub(retention);
        let deleted = self.conn().execute(
            "DELETE FROM processed_emails WHERE processed_at < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            debug!(deleted, cutoff, "swept old dedup records");
        }
        Ok(deleted)
    }

    /// Number of records currently held.
    pub fn len(&self) -> Result<usize> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM processed_emails", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
