//! # SQLite Schema for GrudgeStore
//!
//! This module defines the database schema and handles initialization. The
//! layout follows the persistence contract directly: one row per commit in
//! checkpoint order, plus snapshot and stream-head side tables.
//!
//! ## Table Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Schema Overview                             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  commits                          stream_heads                       │
//! │  ┌──────────────────────┐         ┌─────────────────────────┐        │
//! │  │ checkpoint (PK, AI)  │         │ bucket_id, stream_id PK │        │
//! │  │ bucket_id, stream_id ├────────►│ head_revision           │        │
//! │  │ commit_id            │         │ head_sequence           │        │
//! │  │ commit_sequence      │         │ snapshot_revision       │        │
//! │  │ stream_revision      │         └─────────────────────────┘        │
//! │  │ events BLOB          │                                            │
//! │  └──────────────────────┘         snapshots                          │
//! │                                   ┌─────────────────────────┐        │
//! │                                   │ bucket, stream, rev PK  │        │
//! │                                   │ payload BLOB            │        │
//! │                                   └─────────────────────────┘        │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### Why `AUTOINCREMENT` for the checkpoint?
//!
//! The checkpoint token must strictly increase across all streams and must
//! never be reused, even after deletes. A plain `INTEGER PRIMARY KEY` can
//! recycle rowids of deleted rows; `AUTOINCREMENT` persists the high-water
//! mark in `sqlite_sequence`, which is exactly the contract.
//!
//! ### Why unique indices instead of pre-checks alone?
//!
//! The appender checks the stream head and the commit id inside its
//! transaction before inserting, but the unique indices on
//! `(bucket_id, stream_id, commit_sequence)` and
//! `(bucket_id, stream_id, commit_id)` make the invariants hold even if a
//! future code path forgets the checks. Disk is the source of truth.

use rusqlite::Connection;

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
///
/// For v1 we don't implement migrations - if the version doesn't match, we
/// return an error.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// The `commits` table is the append-only log itself.
///
/// # Columns
///
/// - `checkpoint`: store-global ordering key (PK, auto-increment, never reused)
/// - `bucket_id` / `stream_id`: the stream this commit belongs to
/// - `commit_id`: client-chosen UUID, unique per stream, for idempotent retries
/// - `commit_sequence`: 1-based gapless position in the stream's commit order
/// - `stream_revision`: stream revision after this commit
/// - `event_count`: number of events packed into `events`
/// - `commit_stamp_ms`: wall-clock stamp, Unix milliseconds
/// - `headers`: commit-level headers as JSON
/// - `checksum`: XXH3-64 of `events`, verified on read
/// - `events`: the codec-packed event payload blob
const CREATE_COMMITS: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    checkpoint      INTEGER PRIMARY KEY AUTOINCREMENT,
    bucket_id       TEXT NOT NULL,
    stream_id       TEXT NOT NULL,
    commit_id       TEXT NOT NULL,
    commit_sequence INTEGER NOT NULL,
    stream_revision INTEGER NOT NULL,
    event_count     INTEGER NOT NULL,
    commit_stamp_ms INTEGER NOT NULL,
    headers         BLOB NOT NULL,
    checksum        BLOB NOT NULL,
    events          BLOB NOT NULL
)
"#;

/// Enforces gapless, collision-free commit sequences per stream and serves
/// stream reads ordered by `commit_sequence`.
const CREATE_COMMITS_SEQUENCE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS commits_stream_sequence
ON commits(bucket_id, stream_id, commit_sequence)
"#;

/// Enforces commit-id uniqueness per stream; a violated insert is the
/// storage-level duplicate-commit signal.
const CREATE_COMMITS_COMMIT_ID_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS commits_stream_commit_id
ON commits(bucket_id, stream_id, commit_id)
"#;

/// Serves checkpoint iteration scoped to one bucket.
const CREATE_COMMITS_BUCKET_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS commits_bucket
ON commits(bucket_id, checkpoint)
"#;

/// The `stream_heads` table caches the newest position of every stream.
///
/// # Purpose
///
/// Appends need the current head to detect conflicts, and snapshot jobs need
/// `head_revision - snapshot_revision` without scanning the log. One row per
/// stream, upserted inside the append transaction so it can lag a crashed
/// transaction by exactly nothing: head and commit land or roll back
/// together.
const CREATE_STREAM_HEADS: &str = r#"
CREATE TABLE IF NOT EXISTS stream_heads (
    bucket_id         TEXT NOT NULL,
    stream_id         TEXT NOT NULL,
    head_revision     INTEGER NOT NULL,
    head_sequence     INTEGER NOT NULL,
    snapshot_revision INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (bucket_id, stream_id)
)
"#;

/// The `snapshots` table stores caller-produced folds of stream state.
///
/// Multiple snapshots per stream may coexist; reads pick the highest
/// revision at or below the requested bound. Payloads are opaque, exactly
/// like event bodies.
const CREATE_SNAPSHOTS: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    bucket_id       TEXT NOT NULL,
    stream_id       TEXT NOT NULL,
    stream_revision INTEGER NOT NULL,
    created_ms      INTEGER NOT NULL,
    payload         BLOB NOT NULL,
    PRIMARY KEY (bucket_id, stream_id, stream_revision)
)
"#;

/// Metadata table for schema versioning.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS grudgestore_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A wrapper around a SQLite connection with the GrudgeStore schema applied.
///
/// # Ownership
///
/// `Database` owns its `Connection`. Dropping it closes the connection.
/// [`SqlitePersistence`](crate::storage::SqlitePersistence) consumes a
/// `Database` via [`into_connection`](Database::into_connection).
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

/// Applies pragmas, tables, and indices to a connection, then verifies the
/// schema version. Idempotent; this is what the persistence contract's
/// `initialize` re-runs on an already-open store.
pub(crate) fn apply_schema(conn: &Connection) -> Result<()> {
    // WAL mode: readers see a consistent snapshot while commits land.
    conn.execute_batch("PRAGMA journal_mode = WAL")?;

    // Sync the WAL on commit but not on every write. The client retries
    // on failure anyway.
    conn.execute_batch("PRAGMA synchronous = NORMAL")?;

    conn.execute_batch("PRAGMA foreign_keys = ON")?;

    // IF NOT EXISTS keeps re-initialization safe.
    conn.execute_batch(CREATE_METADATA)?;
    conn.execute_batch(CREATE_COMMITS)?;
    conn.execute_batch(CREATE_COMMITS_SEQUENCE_INDEX)?;
    conn.execute_batch(CREATE_COMMITS_COMMIT_ID_INDEX)?;
    conn.execute_batch(CREATE_COMMITS_BUCKET_INDEX)?;
    conn.execute_batch(CREATE_STREAM_HEADS)?;
    conn.execute_batch(CREATE_SNAPSHOTS)?;

    verify_or_set_version(conn)?;

    Ok(())
}

/// Verifies the schema version, or sets it if this is a new database.
fn verify_or_set_version(conn: &Connection) -> Result<()> {
    let existing: Option<i32> = conn
        .query_row(
            "SELECT value FROM grudgestore_metadata WHERE key = 'schema_version'",
            [],
            |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            },
        )
        .ok();

    match existing {
        None => {
            conn.execute(
                "INSERT INTO grudgestore_metadata (key, value) VALUES ('schema_version', ?)",
                [SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => {
            return Err(Error::Schema(format!(
                "schema version mismatch: database has version {v}, but this GrudgeStore version requires {SCHEMA_VERSION}"
            )));
        }
    }

    Ok(())
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the stored schema version doesn't match
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database.
    ///
    /// In-memory databases are lost when the connection closes; they're for
    /// tests and ephemeral stores, not durability.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Unwraps the initialized connection for the storage layer.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Returns a reference to the underlying SQLite connection.
    ///
    /// For tests and advanced inspection only; callers must not violate the
    /// store's invariants through it.
    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
