//! # The Persistence Contract
//!
//! This module defines [`PersistStreams`], the abstract append-only log the
//! rest of the library consumes. Two backends ship with the crate -
//! [`SqlitePersistence`](crate::storage::SqlitePersistence) for durable
//! stores and [`InMemoryPersistence`](crate::memory::InMemoryPersistence)
//! for tests - and the decorator in [`pipeline`](crate::pipeline) wraps any
//! of them without changing the contract.
//!
//! ## What Backends Must Guarantee
//!
//! - **Atomicity**: a single [`commit`](PersistStreams::commit) is all-or-
//!   nothing; a crash mid-append leaves no partial batch behind.
//! - **Stream correctness**: `(bucket, stream, commit_sequence)` and
//!   `(bucket, stream, commit_id)` are unique, and violations map to the
//!   two distinct failure kinds ([`Error::Conflict`](crate::Error::Conflict)
//!   and [`Error::DuplicateCommit`](crate::Error::DuplicateCommit)).
//! - **Global ordering**: checkpoint tokens strictly increase across all
//!   streams and are never reused.
//!
//! Implementations take `&self` and are `Send + Sync`; callers on many
//! threads share one backend behind an `Arc`.

use crate::error::Result;
use crate::types::{
    BucketId, CheckpointToken, Commit, CommitAttempt, Snapshot, StreamHead, StreamId,
    StreamRevision,
};

/// The abstract append-only log over buckets of streams.
///
/// Reads are side-effect free and restartable; a stream with no commits in
/// the requested range yields an empty vec, never an error.
pub trait PersistStreams: Send + Sync {
    /// Returns all commits of a stream whose revision ranges intersect
    /// `[min_revision, max_revision]`, ordered by commit sequence ascending.
    ///
    /// Bounds are concrete here: the facade resolves the "unbounded"
    /// sentinel to [`StreamRevision::MAX`] before calling.
    fn get_from(
        &self,
        bucket_id: &BucketId,
        stream_id: &StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<Vec<Commit>>;

    /// Returns all commits in a bucket with checkpoint token strictly
    /// greater than `checkpoint`, in checkpoint order.
    ///
    /// Pass [`CheckpointToken::NONE`] to read from the beginning. The
    /// result is a linearization consistent with commit completion across
    /// every stream in the bucket.
    fn get_from_checkpoint(
        &self,
        bucket_id: &BucketId,
        checkpoint: CheckpointToken,
    ) -> Result<Vec<Commit>>;

    /// Durably appends an attempt and returns the commit with its assigned
    /// checkpoint token.
    ///
    /// # Errors
    ///
    /// - [`Error::Conflict`](crate::Error::Conflict) when the attempt is not
    ///   the exact successor of the stream head (a concurrent writer won)
    /// - [`Error::DuplicateCommit`](crate::Error::DuplicateCommit) when the
    ///   commit id is already durable on the stream (a retry landed twice)
    /// - [`Error::Storage`](crate::Error::Storage) on transient backend
    ///   faults; the caller may retry the identical attempt
    fn commit(&self, attempt: CommitAttempt) -> Result<Commit>;

    /// Returns the highest-revision snapshot at or below `max_revision`,
    /// if any.
    fn get_snapshot(
        &self,
        bucket_id: &BucketId,
        stream_id: &StreamId,
        max_revision: StreamRevision,
    ) -> Result<Option<Snapshot>>;

    /// Records a snapshot. Idempotent.
    ///
    /// Returns `false` without storing anything when the target stream does
    /// not exist, when the snapshot is not strictly newer than the one
    /// already recorded, or when it claims a revision beyond the stream
    /// head.
    fn add_snapshot(&self, snapshot: Snapshot) -> Result<bool>;

    /// Returns the streams in a bucket whose replay cost has grown:
    /// `head_revision - snapshot_revision >= min_threshold`.
    fn streams_to_snapshot(
        &self,
        bucket_id: &BucketId,
        min_threshold: u64,
    ) -> Result<Vec<StreamHead>>;

    /// Prepares the backend: schema, indices, pragmas. Idempotent.
    fn initialize(&self) -> Result<()>;

    /// Removes all commits and snapshots in `bucket_id`, or in every bucket
    /// when `None`. Checkpoint tokens of purged commits are never reused.
    fn purge(&self, bucket_id: Option<&BucketId>) -> Result<()>;

    /// Removes a single stream: its commits, snapshots, and head.
    fn delete_stream(&self, bucket_id: &BucketId, stream_id: &StreamId) -> Result<()>;

    /// Tears the store down entirely, including ordering state. After this
    /// the backend behaves like a freshly initialized, empty store.
    fn drop_store(&self) -> Result<()>;
}
