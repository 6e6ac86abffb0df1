//! # In-Memory Persistence
//!
//! A complete [`PersistStreams`] backend that keeps everything in process
//! memory: the commit log as a vec in checkpoint order, plus a stream-head
//! map for O(1) conflict checks - the same head-cache shape the SQLite
//! backend maintains on disk.
//!
//! ## When to Use
//!
//! - Unit and integration tests that don't need persistence
//! - Ephemeral stores (caches, simulations) where replay after restart is
//!   acceptable or irrelevant
//!
//! Nothing survives a drop of the backend. For durability, use
//! [`SqlitePersistence`](crate::storage::SqlitePersistence).
//!
//! ## Invariant: Checkpoints Are Never Reused
//!
//! The checkpoint counter only moves forward. Purging a bucket removes its
//! commits but does not rewind the counter, so later commits still sort
//! strictly after everything that ever existed. Only
//! [`drop_store`](PersistStreams::drop_store) resets it, because that
//! operation models destroying the store itself.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::persistence::PersistStreams;
use crate::types::{
    BucketId, CheckpointToken, Commit, CommitAttempt, CommitId, CommitSequence, Snapshot,
    StreamHead, StreamId, StreamRevision,
};

type StreamKey = (BucketId, StreamId);

/// Per-stream head state: the durable positions plus every commit id the
/// stream has ever accepted (for duplicate detection).
#[derive(Debug)]
struct HeadEntry {
    revision: StreamRevision,
    sequence: CommitSequence,
    snapshot_revision: StreamRevision,
    commit_ids: HashSet<CommitId>,
}

impl HeadEntry {
    fn new() -> Self {
        Self {
            revision: StreamRevision::NONE,
            sequence: CommitSequence::NONE,
            snapshot_revision: StreamRevision::NONE,
            commit_ids: HashSet::new(),
        }
    }
}

#[derive(Debug)]
struct MemoryState {
    /// The commit log, in checkpoint order.
    commits: Vec<Commit>,

    /// Head positions per stream.
    heads: HashMap<StreamKey, HeadEntry>,

    /// Snapshots per stream, sorted ascending by revision.
    snapshots: HashMap<StreamKey, Vec<Snapshot>>,

    /// The next checkpoint token to assign. Starts at 1; never rewinds
    /// except through `drop_store`.
    next_checkpoint: u64,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            commits: Vec::new(),
            heads: HashMap::new(),
            snapshots: HashMap::new(),
            next_checkpoint: 1,
        }
    }
}

/// An in-memory [`PersistStreams`] backend.
///
/// Safe for concurrent use; all state sits behind one mutex, which is fine
/// at test scale and keeps commit atomicity trivial.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    state: Mutex<MemoryState>,
}

impl InMemoryPersistence {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// State entries are only ever advanced, so a poisoned lock holds
    /// nothing worse than a consistent earlier view; recover it.
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistStreams for InMemoryPersistence {
    fn get_from(
        &self,
        bucket_id: &BucketId,
        stream_id: &StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<Vec<Commit>> {
        let state = self.state();
        // Appends happen in checkpoint order and per-stream sequences only
        // grow, so the filtered log is already sequence-ascending.
        Ok(state
            .commits
            .iter()
            .filter(|c| {
                &c.bucket_id == bucket_id
                    && &c.stream_id == stream_id
                    && c.stream_revision >= min_revision
                    && c.first_event_revision() <= max_revision
            })
            .cloned()
            .collect())
    }

    fn get_from_checkpoint(
        &self,
        bucket_id: &BucketId,
        checkpoint: CheckpointToken,
    ) -> Result<Vec<Commit>> {
        let state = self.state();
        Ok(state
            .commits
            .iter()
            .filter(|c| &c.bucket_id == bucket_id && c.checkpoint_token > checkpoint)
            .cloned()
            .collect())
    }

    fn commit(&self, attempt: CommitAttempt) -> Result<Commit> {
        // The facade validates before dispatch, but this backend is public
        // API on its own; a malformed attempt must not reach the log.
        attempt.validate()?;

        let mut state = self.state();

        let key = (attempt.bucket_id.clone(), attempt.stream_id.clone());
        let head = state.heads.entry(key).or_insert_with(HeadEntry::new);

        if head.commit_ids.contains(&attempt.commit_id) {
            return Err(Error::DuplicateCommit {
                stream_id: attempt.stream_id.to_string(),
                commit_id: attempt.commit_id.to_string(),
            });
        }

        // Accept only the exact successor of the head. Both a stale writer
        // (sequence or revision already taken) and a gap-skipping writer
        // surface as a conflict; a gap can never become durable.
        if attempt.commit_sequence != head.sequence.next()
            || attempt.first_event_revision() != head.revision.next()
        {
            return Err(Error::Conflict {
                bucket_id: attempt.bucket_id.to_string(),
                stream_id: attempt.stream_id.to_string(),
                attempted: attempt.stream_revision.as_raw(),
                head: head.revision.as_raw(),
            });
        }

        head.revision = attempt.stream_revision;
        head.sequence = attempt.commit_sequence;
        head.commit_ids.insert(attempt.commit_id);

        let checkpoint = CheckpointToken::from_raw(state.next_checkpoint);
        state.next_checkpoint += 1;

        let commit = Commit {
            checkpoint_token: checkpoint,
            bucket_id: attempt.bucket_id,
            stream_id: attempt.stream_id,
            stream_revision: attempt.stream_revision,
            commit_id: attempt.commit_id,
            commit_sequence: attempt.commit_sequence,
            commit_stamp_ms: attempt.commit_stamp_ms,
            headers: attempt.headers,
            events: attempt.events,
        };

        state.commits.push(commit.clone());
        Ok(commit)
    }

    fn get_snapshot(
        &self,
        bucket_id: &BucketId,
        stream_id: &StreamId,
        max_revision: StreamRevision,
    ) -> Result<Option<Snapshot>> {
        let state = self.state();
        let key = (bucket_id.clone(), stream_id.clone());
        Ok(state.snapshots.get(&key).and_then(|snaps| {
            snaps
                .iter()
                .rev()
                .find(|s| s.stream_revision <= max_revision)
                .cloned()
        }))
    }

    fn add_snapshot(&self, snapshot: Snapshot) -> Result<bool> {
        let mut state = self.state();
        let key = (snapshot.bucket_id.clone(), snapshot.stream_id.clone());

        let Some(head) = state.heads.get_mut(&key) else {
            return Ok(false);
        };
        if snapshot.stream_revision <= head.snapshot_revision
            || snapshot.stream_revision > head.revision
        {
            return Ok(false);
        }

        head.snapshot_revision = snapshot.stream_revision;

        let snaps = state.snapshots.entry(key).or_default();
        let insert_at = snaps
            .iter()
            .position(|s| s.stream_revision > snapshot.stream_revision)
            .unwrap_or(snaps.len());
        snaps.insert(insert_at, snapshot);
        Ok(true)
    }

    fn streams_to_snapshot(
        &self,
        bucket_id: &BucketId,
        min_threshold: u64,
    ) -> Result<Vec<StreamHead>> {
        let state = self.state();
        let mut heads: Vec<StreamHead> = state
            .heads
            .iter()
            .filter(|((bucket, _), head)| {
                bucket == bucket_id
                    && head.revision.as_raw() - head.snapshot_revision.as_raw() >= min_threshold
            })
            .map(|((bucket, stream), head)| StreamHead {
                bucket_id: bucket.clone(),
                stream_id: stream.clone(),
                head_revision: head.revision,
                snapshot_revision: head.snapshot_revision,
            })
            .collect();
        heads.sort_by(|a, b| a.stream_id.as_str().cmp(b.stream_id.as_str()));
        Ok(heads)
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn purge(&self, bucket_id: Option<&BucketId>) -> Result<()> {
        let mut state = self.state();
        match bucket_id {
            None => {
                state.commits.clear();
                state.heads.clear();
                state.snapshots.clear();
            }
            Some(bucket) => {
                state.commits.retain(|c| &c.bucket_id != bucket);
                state.heads.retain(|(b, _), _| b != bucket);
                state.snapshots.retain(|(b, _), _| b != bucket);
            }
        }
        Ok(())
    }

    fn delete_stream(&self, bucket_id: &BucketId, stream_id: &StreamId) -> Result<()> {
        let mut state = self.state();
        state
            .commits
            .retain(|c| !(&c.bucket_id == bucket_id && &c.stream_id == stream_id));
        let key = (bucket_id.clone(), stream_id.clone());
        state.heads.remove(&key);
        state.snapshots.remove(&key);
        Ok(())
    }

    fn drop_store(&self) -> Result<()> {
        *self.state() = MemoryState::default();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventMessage, Headers};

    fn attempt(
        stream: &str,
        sequence: u64,
        revision: u64,
        bodies: &[&[u8]],
    ) -> CommitAttempt {
        CommitAttempt {
            bucket_id: BucketId::default_bucket(),
            stream_id: StreamId::new(stream),
            stream_revision: StreamRevision::from_raw(revision),
            commit_id: CommitId::random(),
            commit_sequence: CommitSequence::from_raw(sequence),
            commit_stamp_ms: 0,
            headers: Headers::new(),
            events: bodies.iter().map(|b| EventMessage::new(b.to_vec())).collect(),
        }
    }

    #[test]
    fn test_commit_assigns_increasing_checkpoints() {
        let store = InMemoryPersistence::new();

        let c1 = store.commit(attempt("s1", 1, 1, &[b"a"])).unwrap();
        let c2 = store.commit(attempt("s2", 1, 1, &[b"b"])).unwrap();
        let c3 = store.commit(attempt("s1", 2, 2, &[b"c"])).unwrap();

        assert_eq!(c1.checkpoint_token.as_raw(), 1);
        assert_eq!(c2.checkpoint_token.as_raw(), 2);
        assert_eq!(c3.checkpoint_token.as_raw(), 3);
    }

    #[test]
    fn test_stale_writer_conflicts() {
        let store = InMemoryPersistence::new();
        store.commit(attempt("s1", 1, 1, &[b"a"])).unwrap();

        // Second writer never saw the first commit.
        let result = store.commit(attempt("s1", 1, 1, &[b"b"]));
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[test]
    fn test_gap_attempt_conflicts() {
        let store = InMemoryPersistence::new();
        store.commit(attempt("s1", 1, 1, &[b"a"])).unwrap();

        let result = store.commit(attempt("s1", 3, 3, &[b"b"]));
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[test]
    fn test_duplicate_commit_id_detected() {
        let store = InMemoryPersistence::new();
        let first = attempt("s1", 1, 1, &[b"a"]);
        let mut retry = attempt("s1", 1, 1, &[b"a"]);
        retry.commit_id = first.commit_id;

        store.commit(first).unwrap();
        let result = store.commit(retry);
        assert!(matches!(result, Err(Error::DuplicateCommit { .. })));
    }

    #[test]
    fn test_get_from_revision_window() {
        let store = InMemoryPersistence::new();
        store.commit(attempt("s1", 1, 2, &[b"e1", b"e2"])).unwrap();
        store.commit(attempt("s1", 2, 4, &[b"e3", b"e4"])).unwrap();
        store.commit(attempt("s1", 3, 5, &[b"e5"])).unwrap();

        let bucket = BucketId::default_bucket();
        let stream = StreamId::new("s1");

        // Only the middle commit intersects [3, 4].
        let window = store
            .get_from(
                &bucket,
                &stream,
                StreamRevision::from_raw(3),
                StreamRevision::from_raw(4),
            )
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].commit_sequence, CommitSequence::from_raw(2));

        // An unknown stream reads as empty history, not an error.
        let missing = store
            .get_from(
                &bucket,
                &StreamId::new("nope"),
                StreamRevision::FIRST,
                StreamRevision::MAX,
            )
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_checkpoint_iteration_is_bucket_scoped() {
        let store = InMemoryPersistence::new();
        store.commit(attempt("s1", 1, 1, &[b"a"])).unwrap();

        let mut other = attempt("s1", 1, 1, &[b"b"]);
        other.bucket_id = BucketId::new("tenant-2");
        store.commit(other).unwrap();

        let commits = store
            .get_from_checkpoint(&BucketId::default_bucket(), CheckpointToken::NONE)
            .unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].checkpoint_token.as_raw(), 1);
    }

    #[test]
    fn test_snapshot_rules() {
        let store = InMemoryPersistence::new();
        let bucket = BucketId::default_bucket();
        let stream = StreamId::new("s1");

        // Unknown stream: refused.
        let early = Snapshot::new("default", "s1", StreamRevision::from_raw(1), b"x".to_vec());
        assert!(!store.add_snapshot(early).unwrap());

        store.commit(attempt("s1", 1, 3, &[b"a", b"b", b"c"])).unwrap();

        // Beyond the head: refused.
        let future = Snapshot::new("default", "s1", StreamRevision::from_raw(9), b"x".to_vec());
        assert!(!store.add_snapshot(future).unwrap());

        let good = Snapshot::new("default", "s1", StreamRevision::from_raw(2), b"fold".to_vec());
        assert!(store.add_snapshot(good.clone()).unwrap());

        // Re-adding the same revision is a no-op, reported as false.
        assert!(!store.add_snapshot(good).unwrap());

        let loaded = store
            .get_snapshot(&bucket, &stream, StreamRevision::MAX)
            .unwrap()
            .expect("snapshot should exist");
        assert_eq!(loaded.stream_revision.as_raw(), 2);
        assert_eq!(loaded.payload, b"fold");

        // A bound below the snapshot revision hides it.
        let hidden = store
            .get_snapshot(&bucket, &stream, StreamRevision::FIRST)
            .unwrap();
        assert!(hidden.is_none());
    }

    #[test]
    fn test_streams_to_snapshot_threshold() {
        let store = InMemoryPersistence::new();
        store.commit(attempt("busy", 1, 5, &[b"a", b"b", b"c", b"d", b"e"])).unwrap();
        store.commit(attempt("quiet", 1, 1, &[b"a"])).unwrap();

        let due = store
            .streams_to_snapshot(&BucketId::default_bucket(), 5)
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].stream_id.as_str(), "busy");
        assert_eq!(due[0].unsnapshotted(), 5);
    }

    #[test]
    fn test_purge_keeps_checkpoint_counter() {
        let store = InMemoryPersistence::new();
        store.commit(attempt("s1", 1, 1, &[b"a"])).unwrap();
        store.purge(None).unwrap();

        let after = store.commit(attempt("s1", 1, 1, &[b"b"])).unwrap();
        assert_eq!(after.checkpoint_token.as_raw(), 2, "tokens are never reused");
    }

    #[test]
    fn test_delete_stream_removes_only_that_stream() {
        let store = InMemoryPersistence::new();
        let bucket = BucketId::default_bucket();
        store.commit(attempt("gone", 1, 1, &[b"a"])).unwrap();
        store.commit(attempt("kept", 1, 1, &[b"b"])).unwrap();

        store.delete_stream(&bucket, &StreamId::new("gone")).unwrap();

        let gone = store
            .get_from(&bucket, &StreamId::new("gone"), StreamRevision::FIRST, StreamRevision::MAX)
            .unwrap();
        assert!(gone.is_empty());

        let kept = store
            .get_from(&bucket, &StreamId::new("kept"), StreamRevision::FIRST, StreamRevision::MAX)
            .unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_drop_store_resets_everything() {
        let store = InMemoryPersistence::new();
        store.commit(attempt("s1", 1, 1, &[b"a"])).unwrap();
        store.drop_store().unwrap();

        let fresh = store.commit(attempt("s1", 1, 1, &[b"b"])).unwrap();
        assert_eq!(fresh.checkpoint_token.as_raw(), 1);
    }
}
