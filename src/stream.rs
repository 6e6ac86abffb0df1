//! # The Optimistic Event Stream
//!
//! [`OptimisticEventStream`] is the client-side object a writer works with:
//! it accumulates uncommitted events, remembers the last observed head of
//! the durable stream, and assembles commit attempts whose revision and
//! sequence are exactly that head advanced by the buffered batch. When the
//! store rejects an attempt, the rejection kind decides what happens next.
//!
//! ## State Machine
//!
//! ```text
//!                 create_stream            open_stream
//!                      │                        │
//!                      ▼                        ▼
//!                 ┌─────────┐  add/set_header ┌────────┐
//!                 │  Fresh  │ ───────────────►│ Dirty  │◄──┐
//!                 └─────────┘                 └───┬────┘   │ conflict
//!                      ▲                          │        │ (history
//!        clear_changes │     commit_changes       │        │ refreshed,
//!                      │  success / duplicate     │        │ buffer kept)
//!                 ┌────┴────┐◄────────────────────┴────────┘
//!                 │ Loaded  │
//!                 └─────────┘
//! ```
//!
//! ## Single Writer
//!
//! A stream is owned by one logical writer at a time and is deliberately
//! not `Sync`-shared: the store it holds is shareable, the buffer is not.
//! Two writers wanting the same stream each open their own copy and let
//! optimistic concurrency arbitrate at commit time.

use std::collections::HashSet;

use crate::codec;
use crate::error::{Error, Result};
use crate::persistence::PersistStreams;
use crate::store::EventStore;
use crate::types::{
    BucketId, Commit, CommitAttempt, CommitId, CommitSequence, EventMessage, Headers, Snapshot,
    StreamId, StreamRevision,
};

/// A stream of events with an uncommitted working set.
///
/// Obtained from [`EventStore::create_stream`],
/// [`EventStore::open_stream`], or
/// [`EventStore::open_stream_from_snapshot`].
pub struct OptimisticEventStream {
    bucket_id: BucketId,
    stream_id: StreamId,
    store: EventStore,

    /// Head of the last observed durable commit.
    stream_revision: StreamRevision,
    commit_sequence: CommitSequence,

    /// Replayed history, trimmed to the open window.
    committed_events: Vec<EventMessage>,
    committed_headers: Headers,

    /// The working set for the next commit.
    uncommitted_events: Vec<EventMessage>,
    uncommitted_headers: Headers,

    /// Commit ids this stream has already incorporated; a retry with a
    /// known id is a no-op.
    identifiers: HashSet<CommitId>,

    /// The revision window events are clipped to when merging commits.
    min_revision: StreamRevision,
    max_revision: StreamRevision,
}

impl OptimisticEventStream {
    pub(crate) fn create(store: EventStore, bucket_id: BucketId, stream_id: StreamId) -> Self {
        Self {
            bucket_id,
            stream_id,
            store,
            stream_revision: StreamRevision::NONE,
            commit_sequence: CommitSequence::NONE,
            committed_events: Vec::new(),
            committed_headers: Headers::new(),
            uncommitted_events: Vec::new(),
            uncommitted_headers: Headers::new(),
            identifiers: HashSet::new(),
            min_revision: StreamRevision::FIRST,
            max_revision: StreamRevision::MAX,
        }
    }

    pub(crate) fn open(
        store: EventStore,
        bucket_id: BucketId,
        stream_id: StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<Self> {
        let mut stream = Self::create(store, bucket_id, stream_id);
        stream.min_revision = min_revision;
        stream.max_revision = max_revision;

        let commits = stream.store.advanced().get_from(
            &stream.bucket_id,
            &stream.stream_id,
            min_revision,
            max_revision,
        )?;
        for commit in &commits {
            stream.merge_commit(commit);
        }
        Ok(stream)
    }

    pub(crate) fn from_snapshot(
        store: EventStore,
        snapshot: Snapshot,
        max_revision: StreamRevision,
    ) -> Result<Self> {
        let mut stream = Self::create(store, snapshot.bucket_id, snapshot.stream_id);
        // The snapshot already folds everything at or below its revision;
        // only later events belong in the replayed history. The query still
        // starts AT the snapshot revision so the commit containing it is
        // merged - its events are clipped by the window, but it restores
        // the head sequence the next attempt must build on.
        stream.stream_revision = snapshot.stream_revision;
        stream.min_revision = snapshot.stream_revision.next();
        stream.max_revision = max_revision;

        let commits = stream.store.advanced().get_from(
            &stream.bucket_id,
            &stream.stream_id,
            snapshot.stream_revision,
            max_revision,
        )?;
        for commit in &commits {
            stream.merge_commit(commit);
        }
        Ok(stream)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The bucket this stream lives in.
    pub fn bucket_id(&self) -> &BucketId {
        &self.bucket_id
    }

    /// The stream identity within its bucket.
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Revision of the last observed durable commit; `NONE` for a fresh
    /// stream.
    pub fn stream_revision(&self) -> StreamRevision {
        self.stream_revision
    }

    /// Sequence of the last observed durable commit; `NONE` for a fresh
    /// stream.
    pub fn commit_sequence(&self) -> CommitSequence {
        self.commit_sequence
    }

    /// The replayed committed events, in order, trimmed to the open window.
    pub fn committed_events(&self) -> &[EventMessage] {
        &self.committed_events
    }

    /// Headers merged from all loaded commits, last writer wins.
    pub fn committed_headers(&self) -> &Headers {
        &self.committed_headers
    }

    /// Events staged for the next commit.
    pub fn uncommitted_events(&self) -> &[EventMessage] {
        &self.uncommitted_events
    }

    /// Headers staged for the next commit.
    pub fn uncommitted_headers(&self) -> &Headers {
        &self.uncommitted_headers
    }

    /// True when anything is staged for commit.
    pub fn has_changes(&self) -> bool {
        !self.uncommitted_events.is_empty()
    }

    // =========================================================================
    // Staging
    // =========================================================================

    /// Appends an event to the uncommitted buffer.
    ///
    /// # Errors
    ///
    /// `InvalidAttempt` for an empty body - an event that says nothing
    /// cannot be replayed into anything.
    pub fn add(&mut self, event: EventMessage) -> Result<()> {
        if event.body.is_empty() {
            return Err(Error::InvalidAttempt(
                "event body must not be empty".to_string(),
            ));
        }
        self.uncommitted_events.push(event);
        Ok(())
    }

    /// Stages a header for the next commit.
    pub fn set_header(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.uncommitted_headers.insert(key.into(), value);
    }

    /// Drops all uncommitted state. Committed history is untouched.
    pub fn clear_changes(&mut self) {
        self.uncommitted_events.clear();
        self.uncommitted_headers.clear();
    }

    // =========================================================================
    // Committing
    // =========================================================================

    /// Commits the uncommitted buffer as one atomic batch.
    ///
    /// Outcomes:
    ///
    /// - `Ok(Some(commit))` - the batch is durable; history was merged and
    ///   the buffer cleared.
    /// - `Ok(None)` - nothing to do (known commit id, empty buffer, or a
    ///   pre-commit veto) or an idempotent retry landed on an already
    ///   durable commit. The buffer is cleared in every such case.
    /// - `Err(Conflict)` - a concurrent writer won. Committed history has
    ///   been refreshed past the stale head; the buffer is **preserved** so
    ///   the caller can re-decide and retry with a new commit id.
    /// - Other errors propagate with the buffer preserved.
    pub fn commit_changes(&mut self, commit_id: CommitId) -> Result<Option<Commit>> {
        if self.identifiers.contains(&commit_id) {
            // This stream already incorporated that commit; the retry has
            // nothing left to do.
            self.clear_changes();
            return Ok(None);
        }
        if self.uncommitted_events.is_empty() {
            return Ok(None);
        }

        let attempt = self.build_attempt(commit_id);
        match self.store.commit(attempt) {
            Ok(Some(commit)) => {
                self.merge_commit(&commit);
                self.clear_changes();
                Ok(Some(commit))
            }
            Ok(None) => {
                // Vetoed: terminal for this batch, same as success minus
                // the merge.
                self.clear_changes();
                Ok(None)
            }
            Err(conflict @ Error::Conflict { .. }) => {
                self.refresh()?;
                Err(conflict)
            }
            Err(Error::DuplicateCommit { .. }) => {
                self.identifiers.insert(commit_id);
                self.clear_changes();
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    /// Pulls commits past the known head into committed state. The
    /// uncommitted buffer is left alone.
    fn refresh(&mut self) -> Result<()> {
        let commits = self.store.advanced().get_from(
            &self.bucket_id,
            &self.stream_id,
            self.stream_revision.next(),
            StreamRevision::MAX,
        )?;
        for commit in &commits {
            self.merge_commit(commit);
        }
        Ok(())
    }

    fn build_attempt(&self, commit_id: CommitId) -> CommitAttempt {
        CommitAttempt {
            bucket_id: self.bucket_id.clone(),
            stream_id: self.stream_id.clone(),
            stream_revision: self.stream_revision.add(self.uncommitted_events.len() as u64),
            commit_id,
            commit_sequence: self.commit_sequence.next(),
            commit_stamp_ms: codec::current_time_ms(),
            headers: self.uncommitted_headers.clone(),
            events: self.uncommitted_events.clone(),
        }
    }

    /// Folds one durable commit into committed state.
    ///
    /// Events are appended only when their effective revision falls inside
    /// the stream's open window; the head still advances past clipped
    /// events, because attempts must build on the real durable head.
    fn merge_commit(&mut self, commit: &Commit) {
        let first = commit.first_event_revision();
        for (index, event) in commit.events.iter().enumerate() {
            let revision = first.add(index as u64);
            if revision < self.min_revision || revision > self.max_revision {
                continue;
            }
            self.committed_events.push(event.clone());
        }

        self.stream_revision = self.stream_revision.max(commit.stream_revision);
        self.commit_sequence = self.commit_sequence.max(commit.commit_sequence);

        for (key, value) in &commit.headers {
            self.committed_headers.insert(key.clone(), value.clone());
        }

        self.identifiers.insert(commit.commit_id);
    }
}

// =============================================================================
// Tests
// =============================================================================
