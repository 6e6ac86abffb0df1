//! # Pipeline Hooks
//!
//! Hooks are ordered interceptors over the commit and read paths. The chain
//! is plain data - a vec of trait objects owned by the
//! [`EventStore`](crate::store::EventStore) - and every capability is
//! optional via default methods.
//!
//! ## Dispatch Rules
//!
//! - `pre_commit` runs in registration order before persistence. `Ok(false)`
//!   vetoes: the facade returns no commit, persistence is untouched, and
//!   later hooks are skipped. An `Err` aborts with that failure.
//! - `post_commit` runs in registration order after a durable append.
//!   Failures are logged and suppressed; every hook always runs.
//! - `select` runs over each commit a read yields, composed left to right;
//!   returning `None` drops the commit from the result.
//! - `on_purge` / `on_delete_stream` observe admin operations so hook-local
//!   caches can invalidate.
//!
//! ## The Optimistic Hook
//!
//! [`OptimisticCommitHook`] is the built-in fast path for conflict
//! detection: a process-local cache of stream heads that rejects doomed
//! attempts before they reach storage. Entries are monotonic and bounded;
//! anything evicted simply defers detection to the backend, which remains
//! the source of truth.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::error::{Error, Result};
use crate::types::{BucketId, Commit, CommitAttempt, CommitId, CommitSequence, StreamId, StreamRevision};

// =============================================================================
// The Hook Trait
// =============================================================================

/// An interceptor over the commit/read pipeline.
///
/// Implement only the capabilities you need; every method has a pass-through
/// default. Hooks must be `Send + Sync` - the facade and decorator invoke
/// them from any calling thread.
pub trait PipelineHook: Send + Sync {
    /// Called before persistence, in registration order.
    ///
    /// Return `Ok(false)` to veto the commit, `Ok(true)` to continue the
    /// chain, or `Err` to abort with a typed failure.
    fn pre_commit(&self, _attempt: &CommitAttempt) -> Result<bool> {
        Ok(true)
    }

    /// Called after a successful durable append, in registration order.
    ///
    /// Errors are logged by the facade and never propagated; a failing
    /// observer cannot undo a durable commit.
    fn post_commit(&self, _commit: &Commit) -> Result<()> {
        Ok(())
    }

    /// Applied to each commit produced by a read before it reaches the
    /// caller. Return `None` to drop the commit, or a (possibly
    /// transformed) commit to keep it.
    fn select(&self, commit: Commit) -> Option<Commit> {
        Some(commit)
    }

    /// Observes a purge of one bucket (`Some`) or the whole store (`None`).
    fn on_purge(&self, _bucket_id: Option<&BucketId>) {}

    /// Observes deletion of a single stream.
    fn on_delete_stream(&self, _bucket_id: &BucketId, _stream_id: &StreamId) {}
}

// =============================================================================
// Optimistic Concurrency Hook
// =============================================================================

/// Default bound on the number of streams tracked at once.
const DEFAULT_MAX_STREAMS: usize = 4096;

/// Default bound on remembered commit ids per stream.
const DEFAULT_IDS_PER_STREAM: usize = 128;

type StreamKey = (BucketId, StreamId);

/// The head observed for one stream, plus its recently-seen commit ids.
struct TrackedHead {
    revision: StreamRevision,
    sequence: CommitSequence,
    recent_ids: LruCache<CommitId, ()>,
}

impl TrackedHead {
    fn new(ids_per_stream: NonZeroUsize) -> Self {
        Self {
            revision: StreamRevision::NONE,
            sequence: CommitSequence::NONE,
            recent_ids: LruCache::new(ids_per_stream),
        }
    }

    /// Entries only ever advance. Commits can be observed out of order when
    /// reads race writes; taking the max keeps the cache truthful either
    /// way.
    fn observe(&mut self, commit: &Commit) {
        self.revision = self.revision.max(commit.stream_revision);
        self.sequence = self.sequence.max(commit.commit_sequence);
        self.recent_ids.put(commit.commit_id, ());
    }
}

/// A process-local conflict detector for the commit pipeline.
///
/// For each `(bucket, stream)` it tracks the head `(revision, sequence)`
/// observed through `select` and `post_commit`. `pre_commit` then rejects
/// attempts that are already stale - without a storage round-trip - and
/// flags recently-seen commit ids as duplicates.
///
/// # Correctness Under Eviction
///
/// Both caches are bounded LRUs. Losing an entry can only produce a false
/// *miss* (the attempt proceeds and the backend re-checks); it can never
/// produce a false conflict, because an absent entry allows everything.
pub struct OptimisticCommitHook {
    ids_per_stream: NonZeroUsize,
    heads: Mutex<LruCache<StreamKey, TrackedHead>>,
}

impl OptimisticCommitHook {
    /// Creates a hook with the default capacity bounds.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STREAMS, DEFAULT_IDS_PER_STREAM)
    }

    /// Creates a hook tracking at most `max_streams` streams and
    /// `ids_per_stream` recent commit ids each.
    ///
    /// # Panics
    ///
    /// Panics if either capacity is zero.
    pub fn with_capacity(max_streams: usize, ids_per_stream: usize) -> Self {
        let max_streams = NonZeroUsize::new(max_streams).expect("max_streams must be non-zero");
        let ids_per_stream =
            NonZeroUsize::new(ids_per_stream).expect("ids_per_stream must be non-zero");
        Self {
            ids_per_stream,
            heads: Mutex::new(LruCache::new(max_streams)),
        }
    }

    /// Cache entries are monotonic, so the state behind a poisoned lock is
    /// still a valid (merely possibly stale) view; recover it.
    fn heads(&self) -> MutexGuard<'_, LruCache<StreamKey, TrackedHead>> {
        self.heads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, commit: &Commit) {
        let mut heads = self.heads();
        let key = (commit.bucket_id.clone(), commit.stream_id.clone());
        match heads.get_mut(&key) {
            Some(head) => head.observe(commit),
            None => {
                let mut head = TrackedHead::new(self.ids_per_stream);
                head.observe(commit);
                heads.put(key, head);
            }
        }
    }
}

impl Default for OptimisticCommitHook {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineHook for OptimisticCommitHook {
    fn pre_commit(&self, attempt: &CommitAttempt) -> Result<bool> {
        let mut heads = self.heads();
        let key = (attempt.bucket_id.clone(), attempt.stream_id.clone());

        let Some(head) = heads.get_mut(&key) else {
            // Unknown stream: nothing to judge, let the backend decide.
            return Ok(true);
        };

        if head.recent_ids.contains(&attempt.commit_id) {
            return Err(Error::DuplicateCommit {
                stream_id: attempt.stream_id.to_string(),
                commit_id: attempt.commit_id.to_string(),
            });
        }

        if attempt.commit_sequence <= head.sequence || attempt.stream_revision <= head.revision {
            return Err(Error::Conflict {
                bucket_id: attempt.bucket_id.to_string(),
                stream_id: attempt.stream_id.to_string(),
                attempted: attempt.stream_revision.as_raw(),
                head: head.revision.as_raw(),
            });
        }

        Ok(true)
    }

    fn post_commit(&self, commit: &Commit) -> Result<()> {
        self.track(commit);
        Ok(())
    }

    fn select(&self, commit: Commit) -> Option<Commit> {
        self.track(&commit);
        Some(commit)
    }

    fn on_purge(&self, bucket_id: Option<&BucketId>) {
        let mut heads = self.heads();
        match bucket_id {
            None => heads.clear(),
            Some(bucket) => {
                let doomed: Vec<StreamKey> = heads
                    .iter()
                    .filter(|((b, _), _)| b == bucket)
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in doomed {
                    heads.pop(&key);
                }
            }
        }
    }

    fn on_delete_stream(&self, bucket_id: &BucketId, stream_id: &StreamId) {
        self.heads()
            .pop(&(bucket_id.clone(), stream_id.clone()));
    }
}

// =============================================================================
// Tests
// =============================================================================
