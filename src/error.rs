//! # Error Handling for GrudgeStore
//!
//! This module defines the error types used throughout GrudgeStore. We use a
//! single error enum ([`Error`]) to represent all failure modes, which keeps
//! signatures simple and lets callers match uniformly.
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Conflict | Concurrent writer won the race | Refresh the stream, re-decide, retry |
//! | Duplicate | Commit id already durable | Treat as idempotent success |
//! | Invalid | Attempt violates structural invariants | Fix the caller; storage was never touched |
//! | Internal | SQLite error, corrupt payload | Log and investigate |
//! | Transient | Backend temporarily unavailable | Retry after backoff |
//!
//! A stream with no commits in the requested range is **not** an error: reads
//! return empty history and opens produce a stream at revision zero.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in GrudgeStore operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Conflict Errors (client can retry with updated data)
    // =========================================================================

    /// Optimistic concurrency conflict: another writer committed to the
    /// stream between the client's open and its commit.
    ///
    /// # When This Happens
    ///
    /// Every commit attempt carries the revision and sequence the writer
    /// computed from its last observed head. If a concurrent commit advanced
    /// the stream in the meantime, the attempt no longer lines up with the
    /// durable head and is rejected.
    ///
    /// # Recovery
    ///
    /// 1. Let the stream refresh its committed history (the
    ///    [`OptimisticEventStream`](crate::stream::OptimisticEventStream)
    ///    does this automatically before rethrowing)
    /// 2. Re-apply business logic against the refreshed state
    /// 3. Retry the commit with a fresh commit id
    #[error("conflict on stream '{stream_id}' in bucket '{bucket_id}': attempted revision {attempted}, but head is at {head}")]
    Conflict {
        /// Bucket containing the contested stream.
        bucket_id: String,
        /// The stream where the conflict occurred.
        stream_id: String,
        /// The stream revision the attempt would have produced.
        attempted: u64,
        /// The durable (or locally observed) head revision.
        head: u64,
    },

    // =========================================================================
    // Idempotency (a signal, not a failure, at the stream level)
    // =========================================================================

    /// A commit with this id is already durable on the stream.
    ///
    /// # When This Happens
    ///
    /// Clients retry after timeouts even when the original attempt landed, and
    /// networks deliver requests twice. The commit id makes the retry
    /// detectable: the store refuses to append a second copy.
    ///
    /// # Recovery
    ///
    /// Nothing to repair - exactly one commit exists. The stream treats this
    /// as idempotent success: it records the id, clears its uncommitted
    /// buffer, and swallows the error.
    #[error("duplicate commit '{commit_id}' on stream '{stream_id}': already durable")]
    DuplicateCommit {
        /// The stream that already holds the commit.
        stream_id: String,
        /// The commit id presented twice.
        commit_id: String,
    },

    /// A commit attempt violates a structural invariant and was rejected
    /// before any storage work: empty event list, empty event body, zero
    /// commit sequence, or a revision smaller than the event count.
    #[error("invalid commit attempt: {0}")]
    InvalidAttempt(String),

    // =========================================================================
    // Internal Errors (investigate and fix)
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// Wraps any error from the `rusqlite` crate: locked database file, full
    /// disk, corrupted file, or a SQL bug in GrudgeStore itself. The `#[from]`
    /// attribute lets `?` convert these automatically.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema version mismatch or stored-data corruption.
    ///
    /// # When This Happens
    ///
    /// - Opening a database created by a newer GrudgeStore version
    /// - A commit payload fails its checksum or cannot be decoded
    /// - The database file was modified outside GrudgeStore
    ///
    /// # Recovery
    ///
    /// May require manual intervention or restore from backup.
    #[error("schema error: {0}")]
    Schema(String),

    /// Transient backend fault; the operation may succeed if retried.
    #[error("storage unavailable: {0}")]
    Storage(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
