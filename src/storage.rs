//! # SQLite Persistence
//!
//! This module implements the [`PersistStreams`] contract over SQLite. It is
//! the durable backend: one row per commit in the `commits` table, with the
//! checkpoint token riding on SQLite's `AUTOINCREMENT` rowid.
//!
//! ## Append Path
//!
//! ```text
//! commit(attempt)
//!     │
//!     ▼
//! ┌────────────────────────────────────────────────┐
//! │ BEGIN                                          │
//! │   1. duplicate check   (commit_id durable?)    │
//! │   2. head check        (exact successor?)      │
//! │   3. INSERT commit row (payload + checksum)    │
//! │   4. UPSERT stream head                        │
//! │ COMMIT                 (one fsync, all or none)│
//! └────────────────────────────────────────────────┘
//! ```
//!
//! The head upsert happens inside the same transaction as the commit row, so
//! `stream_heads` can never disagree with the log. The unique indices on
//! `(bucket, stream, commit_sequence)` and `(bucket, stream, commit_id)`
//! back the in-transaction checks at the storage level.
//!
//! ## Thread Safety
//!
//! The connection sits behind a `Mutex`; the backend is `Send + Sync` and
//! shared behind an `Arc` by the facade. SQLite serializes writes anyway, so
//! the single connection is not the bottleneck at embedded-library scale.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use uuid::Uuid;

use crate::codec;
use crate::error::{Error, Result};
use crate::persistence::PersistStreams;
use crate::schema::{self, Database};
use crate::types::{
    BucketId, CheckpointToken, Commit, CommitAttempt, CommitId, CommitSequence, Headers, Snapshot,
    StreamHead, StreamId, StreamRevision,
};

// =============================================================================
// SQL Fragments
// =============================================================================

/// Columns needed to rebuild a [`Commit`], in the order `row_to_commit`
/// expects them.
const COMMIT_COLUMNS: &str = "checkpoint, bucket_id, stream_id, commit_id, commit_sequence, \
     stream_revision, event_count, commit_stamp_ms, headers, checksum, events";

// =============================================================================
// SqlitePersistence
// =============================================================================

/// A [`PersistStreams`] backend over SQLite, file-based or in-memory.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    /// Opens (creating if necessary) a file-backed store.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Opens an in-memory store. State is lost when the backend drops.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Wraps an already-initialized [`Database`].
    pub fn new(db: Database) -> Self {
        Self {
            conn: Mutex::new(db.into_connection()),
        }
    }

    /// A panicked holder can only have left SQLite mid-statement; any open
    /// transaction rolled back when its guard dropped, so the connection
    /// behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

/// Intermediate row shape; decoded into a [`Commit`] outside the rusqlite
/// closure so codec failures surface as our errors, not SQLite's.
struct CommitRow {
    checkpoint: i64,
    bucket_id: String,
    stream_id: String,
    commit_id: String,
    commit_sequence: i64,
    stream_revision: i64,
    event_count: i64,
    commit_stamp_ms: i64,
    headers: Vec<u8>,
    checksum: Vec<u8>,
    events: Vec<u8>,
}

fn read_commit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommitRow> {
    Ok(CommitRow {
        checkpoint: row.get(0)?,
        bucket_id: row.get(1)?,
        stream_id: row.get(2)?,
        commit_id: row.get(3)?,
        commit_sequence: row.get(4)?,
        stream_revision: row.get(5)?,
        event_count: row.get(6)?,
        commit_stamp_ms: row.get(7)?,
        headers: row.get(8)?,
        checksum: row.get(9)?,
        events: row.get(10)?,
    })
}

fn row_to_commit(row: CommitRow) -> Result<Commit> {
    codec::verify_checksum(&row.events, &row.checksum)?;

    let events = codec::decode_events(&row.events, row.event_count as usize)?;
    let headers: Headers = serde_json::from_slice(&row.headers)
        .map_err(|e| Error::Schema(format!("invalid commit headers: {e}")))?;
    let commit_id = Uuid::parse_str(&row.commit_id)
        .map(CommitId::from_uuid)
        .map_err(|e| Error::Schema(format!("invalid commit id '{}': {e}", row.commit_id)))?;

    Ok(Commit {
        checkpoint_token: CheckpointToken::from_raw(row.checkpoint as u64),
        bucket_id: BucketId::new(row.bucket_id),
        stream_id: StreamId::new(row.stream_id),
        stream_revision: StreamRevision::from_raw(row.stream_revision as u64),
        commit_id,
        commit_sequence: CommitSequence::from_raw(row.commit_sequence as u64),
        commit_stamp_ms: row.commit_stamp_ms as u64,
        headers,
        events,
    })
}

/// Clamps a u64 ordering key into SQLite's signed integer range.
///
/// Only the `MAX` sentinel ever exceeds `i64::MAX`, and a bound of
/// `i64::MAX` is already beyond any assignable value.
fn to_sql_key(value: u64) -> i64 {
    value.min(i64::MAX as u64) as i64
}

/// Retries make sense for busy/locked, not for constraint or corruption
/// failures; give those their own variant.
fn translate(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == ErrorCode::DatabaseBusy || inner.code == ErrorCode::DatabaseLocked =>
        {
            Error::Storage(e.to_string())
        }
        _ => Error::Sqlite(e),
    }
}

// =============================================================================
// PersistStreams Implementation
// =============================================================================

impl PersistStreams for SqlitePersistence {
    fn get_from(
        &self,
        bucket_id: &BucketId,
        stream_id: &StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<Vec<Commit>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits
             WHERE bucket_id = ? AND stream_id = ?
               AND stream_revision >= ?
               AND stream_revision - event_count + 1 <= ?
             ORDER BY commit_sequence"
        ))?;

        let rows = stmt.query_map(
            params![
                bucket_id.as_str(),
                stream_id.as_str(),
                to_sql_key(min_revision.as_raw()),
                to_sql_key(max_revision.as_raw()),
            ],
            read_commit_row,
        )?;

        let mut commits = Vec::new();
        for row in rows {
            commits.push(row_to_commit(row?)?);
        }
        Ok(commits)
    }

    fn get_from_checkpoint(
        &self,
        bucket_id: &BucketId,
        checkpoint: CheckpointToken,
    ) -> Result<Vec<Commit>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits
             WHERE bucket_id = ? AND checkpoint > ?
             ORDER BY checkpoint"
        ))?;

        let rows = stmt.query_map(
            params![bucket_id.as_str(), to_sql_key(checkpoint.as_raw())],
            read_commit_row,
        )?;

        let mut commits = Vec::new();
        for row in rows {
            commits.push(row_to_commit(row?)?);
        }
        Ok(commits)
    }

    fn commit(&self, attempt: CommitAttempt) -> Result<Commit> {
        // The facade validates before dispatch, but this backend is public
        // API on its own; a malformed attempt must not reach the log.
        attempt.validate()?;

        let mut conn = self.lock();
        let tx = conn.transaction().map_err(translate)?;

        let commit_id_text = attempt.commit_id.to_string();

        let duplicates: i64 = tx.query_row(
            "SELECT COUNT(*) FROM commits
             WHERE bucket_id = ? AND stream_id = ? AND commit_id = ?",
            params![
                attempt.bucket_id.as_str(),
                attempt.stream_id.as_str(),
                commit_id_text,
            ],
            |row| row.get(0),
        )?;
        if duplicates > 0 {
            return Err(Error::DuplicateCommit {
                stream_id: attempt.stream_id.to_string(),
                commit_id: commit_id_text,
            });
        }

        let head: Option<(i64, i64)> = tx
            .query_row(
                "SELECT head_revision, head_sequence FROM stream_heads
                 WHERE bucket_id = ? AND stream_id = ?",
                params![attempt.bucket_id.as_str(), attempt.stream_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (head_revision, head_sequence) = head.unwrap_or((0, 0));

        // Accept only the exact successor of the head; stale and
        // gap-skipping writers both conflict, so gaps can never land.
        if attempt.commit_sequence.as_raw() != head_sequence as u64 + 1
            || attempt.first_event_revision().as_raw() != head_revision as u64 + 1
        {
            return Err(Error::Conflict {
                bucket_id: attempt.bucket_id.to_string(),
                stream_id: attempt.stream_id.to_string(),
                attempted: attempt.stream_revision.as_raw(),
                head: head_revision as u64,
            });
        }

        let events_blob = codec::encode_events(&attempt.events)?;
        let checksum = codec::compute_checksum(&events_blob);
        let headers_blob = serde_json::to_vec(&attempt.headers)
            .map_err(|e| Error::Schema(format!("unencodable commit headers: {e}")))?;

        tx.execute(
            "INSERT INTO commits
                 (bucket_id, stream_id, commit_id, commit_sequence, stream_revision,
                  event_count, commit_stamp_ms, headers, checksum, events)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                attempt.bucket_id.as_str(),
                attempt.stream_id.as_str(),
                commit_id_text,
                attempt.commit_sequence.as_raw() as i64,
                attempt.stream_revision.as_raw() as i64,
                attempt.events.len() as i64,
                attempt.commit_stamp_ms as i64,
                headers_blob,
                checksum,
                events_blob,
            ],
        )?;

        let checkpoint = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO stream_heads
                 (bucket_id, stream_id, head_revision, head_sequence, snapshot_revision)
             VALUES (?, ?, ?, ?, 0)
             ON CONFLICT(bucket_id, stream_id) DO UPDATE SET
                 head_revision = excluded.head_revision,
                 head_sequence = excluded.head_sequence",
            params![
                attempt.bucket_id.as_str(),
                attempt.stream_id.as_str(),
                attempt.stream_revision.as_raw() as i64,
                attempt.commit_sequence.as_raw() as i64,
            ],
        )?;

        tx.commit().map_err(translate)?;

        Ok(Commit {
            checkpoint_token: CheckpointToken::from_raw(checkpoint as u64),
            bucket_id: attempt.bucket_id,
            stream_id: attempt.stream_id,
            stream_revision: attempt.stream_revision,
            commit_id: attempt.commit_id,
            commit_sequence: attempt.commit_sequence,
            commit_stamp_ms: attempt.commit_stamp_ms,
            headers: attempt.headers,
            events: attempt.events,
        })
    }

    fn get_snapshot(
        &self,
        bucket_id: &BucketId,
        stream_id: &StreamId,
        max_revision: StreamRevision,
    ) -> Result<Option<Snapshot>> {
        let conn = self.lock();
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT stream_revision, payload FROM snapshots
                 WHERE bucket_id = ? AND stream_id = ? AND stream_revision <= ?
                 ORDER BY stream_revision DESC
                 LIMIT 1",
                params![
                    bucket_id.as_str(),
                    stream_id.as_str(),
                    to_sql_key(max_revision.as_raw()),
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(revision, payload)| Snapshot {
            bucket_id: bucket_id.clone(),
            stream_id: stream_id.clone(),
            stream_revision: StreamRevision::from_raw(revision as u64),
            payload,
        }))
    }

    fn add_snapshot(&self, snapshot: Snapshot) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(translate)?;

        let head: Option<(i64, i64)> = tx
            .query_row(
                "SELECT head_revision, snapshot_revision FROM stream_heads
                 WHERE bucket_id = ? AND stream_id = ?",
                params![snapshot.bucket_id.as_str(), snapshot.stream_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((head_revision, recorded)) = head else {
            return Ok(false);
        };
        let revision = snapshot.stream_revision.as_raw();
        if revision <= recorded as u64 || revision > head_revision as u64 {
            return Ok(false);
        }

        tx.execute(
            "INSERT OR IGNORE INTO snapshots
                 (bucket_id, stream_id, stream_revision, created_ms, payload)
             VALUES (?, ?, ?, ?, ?)",
            params![
                snapshot.bucket_id.as_str(),
                snapshot.stream_id.as_str(),
                revision as i64,
                codec::current_time_ms() as i64,
                snapshot.payload,
            ],
        )?;

        tx.execute(
            "UPDATE stream_heads SET snapshot_revision = ?
             WHERE bucket_id = ? AND stream_id = ?",
            params![
                revision as i64,
                snapshot.bucket_id.as_str(),
                snapshot.stream_id.as_str(),
            ],
        )?;

        tx.commit().map_err(translate)?;
        Ok(true)
    }

    fn streams_to_snapshot(
        &self,
        bucket_id: &BucketId,
        min_threshold: u64,
    ) -> Result<Vec<StreamHead>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT stream_id, head_revision, snapshot_revision FROM stream_heads
             WHERE bucket_id = ? AND head_revision - snapshot_revision >= ?
             ORDER BY stream_id",
        )?;

        let rows = stmt.query_map(
            params![bucket_id.as_str(), to_sql_key(min_threshold)],
            |row| {
                let stream_id: String = row.get(0)?;
                let head_revision: i64 = row.get(1)?;
                let snapshot_revision: i64 = row.get(2)?;
                Ok((stream_id, head_revision, snapshot_revision))
            },
        )?;

        let mut heads = Vec::new();
        for row in rows {
            let (stream_id, head_revision, snapshot_revision) = row?;
            heads.push(StreamHead {
                bucket_id: bucket_id.clone(),
                stream_id: StreamId::new(stream_id),
                head_revision: StreamRevision::from_raw(head_revision as u64),
                snapshot_revision: StreamRevision::from_raw(snapshot_revision as u64),
            });
        }
        Ok(heads)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock();
        schema::apply_schema(&conn)
    }

    fn purge(&self, bucket_id: Option<&BucketId>) -> Result<()> {
        let conn = self.lock();
        match bucket_id {
            None => {
                // Leaves sqlite_sequence alone: purged tokens stay burned.
                conn.execute("DELETE FROM commits", [])?;
                conn.execute("DELETE FROM snapshots", [])?;
                conn.execute("DELETE FROM stream_heads", [])?;
            }
            Some(bucket) => {
                conn.execute("DELETE FROM commits WHERE bucket_id = ?", [bucket.as_str()])?;
                conn.execute("DELETE FROM snapshots WHERE bucket_id = ?", [bucket.as_str()])?;
                conn.execute(
                    "DELETE FROM stream_heads WHERE bucket_id = ?",
                    [bucket.as_str()],
                )?;
            }
        }
        Ok(())
    }

    fn delete_stream(&self, bucket_id: &BucketId, stream_id: &StreamId) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM commits WHERE bucket_id = ? AND stream_id = ?",
            params![bucket_id.as_str(), stream_id.as_str()],
        )?;
        conn.execute(
            "DELETE FROM snapshots WHERE bucket_id = ? AND stream_id = ?",
            params![bucket_id.as_str(), stream_id.as_str()],
        )?;
        conn.execute(
            "DELETE FROM stream_heads WHERE bucket_id = ? AND stream_id = ?",
            params![bucket_id.as_str(), stream_id.as_str()],
        )?;
        Ok(())
    }

    fn drop_store(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM commits", [])?;
        conn.execute("DELETE FROM snapshots", [])?;
        conn.execute("DELETE FROM stream_heads", [])?;
        // Dropping the store resets the checkpoint high-water mark too.
        conn.execute("DELETE FROM sqlite_sequence WHERE name = 'commits'", [])?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
