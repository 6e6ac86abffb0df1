//! # The Event Store Facade
//!
//! [`EventStore`] is the main entry point. It opens and creates streams,
//! routes every commit through the hook chain, and exposes the decorated
//! persistence contract as an escape hatch for advanced callers.
//!
//! ## Commit Dispatch
//!
//! ```text
//! stream.commit_changes(id)
//!         │
//!         ▼
//! EventStore::commit(attempt)
//!         │ validate            (InvalidAttempt fails fast)
//!         │ pre-commit hooks    (in order; Ok(false) vetoes → Ok(None))
//!         ▼
//! PersistStreams::commit        (durable append, checkpoint assigned)
//!         │
//!         │ post-commit hooks   (in order; failures logged, suppressed)
//!         ▼
//! Ok(Some(commit))
//! ```
//!
//! ## Sharing
//!
//! `EventStore` is `Clone`, `Send`, and `Sync`: clones share one backend and
//! one hook chain. Streams themselves are single-writer objects; hand each
//! logical writer its own stream, not its own store.

use std::sync::Arc;

use crate::error::Result;
use crate::hooks::{OptimisticCommitHook, PipelineHook};
use crate::persistence::PersistStreams;
use crate::pipeline::HookedPersistence;
use crate::stream::OptimisticEventStream;
use crate::types::{BucketId, Commit, CommitAttempt, Snapshot, StreamId, StreamRevision};

// =============================================================================
// Builder
// =============================================================================

/// Configures and wires an [`EventStore`].
///
/// The optimistic concurrency hook is always installed first; hooks added
/// here run after it, in registration order.
pub struct EventStoreBuilder {
    persistence: Arc<dyn PersistStreams>,
    hooks: Vec<Arc<dyn PipelineHook>>,
}

impl EventStoreBuilder {
    /// Registers a hook at the end of the chain.
    pub fn hook(mut self, hook: impl PipelineHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Registers an already-shared hook at the end of the chain.
    ///
    /// Useful when the caller wants to keep a handle to the hook (e.g. to
    /// inspect state it accumulates).
    pub fn hook_arc(mut self, hook: Arc<dyn PipelineHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Initializes the backend and assembles the store.
    pub fn build(self) -> Result<EventStore> {
        self.persistence.initialize()?;

        let mut chain: Vec<Arc<dyn PipelineHook>> = Vec::with_capacity(self.hooks.len() + 1);
        chain.push(Arc::new(OptimisticCommitHook::new()));
        chain.extend(self.hooks);
        let hooks: Arc<[Arc<dyn PipelineHook>]> = chain.into();

        let persistence = HookedPersistence::new(self.persistence, hooks.clone());

        Ok(EventStore {
            inner: Arc::new(StoreInner { persistence, hooks }),
        })
    }
}

// =============================================================================
// EventStore
// =============================================================================

struct StoreInner {
    /// The decorated backend: reads run hook `select`, admin ops fan out.
    persistence: HookedPersistence,

    /// The hook chain, in dispatch order (optimistic hook first).
    hooks: Arc<[Arc<dyn PipelineHook>]>,
}

/// The event store facade. Cheap to clone; clones share everything.
///
/// Teardown is RAII: dropping the last clone drops the hook chain and then
/// the backend.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<StoreInner>,
}

impl EventStore {
    /// Starts a builder over an owned backend.
    pub fn builder(persistence: impl PersistStreams + 'static) -> EventStoreBuilder {
        Self::builder_shared(Arc::new(persistence))
    }

    /// Starts a builder over a shared backend.
    ///
    /// Sharing one backend across several stores models several writer
    /// processes hitting the same storage: each store has its own hook
    /// caches, and conflicts between them are caught by the backend.
    pub fn builder_shared(persistence: Arc<dyn PersistStreams>) -> EventStoreBuilder {
        EventStoreBuilder {
            persistence,
            hooks: Vec::new(),
        }
    }

    /// Builds a store with no user hooks.
    pub fn open(persistence: impl PersistStreams + 'static) -> Result<Self> {
        Self::builder(persistence).build()
    }

    /// Creates a fresh, transient stream at revision zero.
    ///
    /// Nothing is persisted until the stream's first
    /// [`commit_changes`](OptimisticEventStream::commit_changes).
    pub fn create_stream(
        &self,
        bucket_id: impl Into<BucketId>,
        stream_id: impl Into<StreamId>,
    ) -> OptimisticEventStream {
        OptimisticEventStream::create(self.clone(), bucket_id.into(), stream_id.into())
    }

    /// Opens a stream, replaying committed history in `[min_revision,
    /// max_revision]` into it.
    ///
    /// `max_revision` of [`StreamRevision::NONE`] means unbounded; the
    /// sentinel is resolved here and never reaches persistence. A stream
    /// with no commits in range opens at revision zero with empty history -
    /// not-found is not a failure.
    pub fn open_stream(
        &self,
        bucket_id: impl Into<BucketId>,
        stream_id: impl Into<StreamId>,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<OptimisticEventStream> {
        OptimisticEventStream::open(
            self.clone(),
            bucket_id.into(),
            stream_id.into(),
            min_revision,
            resolve_max(max_revision),
        )
    }

    /// Opens a stream from a snapshot, loading only commits with revisions
    /// above `snapshot.stream_revision`.
    pub fn open_stream_from_snapshot(
        &self,
        snapshot: Snapshot,
        max_revision: StreamRevision,
    ) -> Result<OptimisticEventStream> {
        OptimisticEventStream::from_snapshot(self.clone(), snapshot, resolve_max(max_revision))
    }

    /// Runs an attempt through the commit pipeline.
    ///
    /// Returns `Ok(None)` when a pre-commit hook vetoed; persistence is
    /// untouched and no post-commit hook runs. Otherwise returns the
    /// durable commit with its checkpoint token.
    pub fn commit(&self, attempt: CommitAttempt) -> Result<Option<Commit>> {
        attempt.validate()?;

        for hook in self.inner.hooks.iter() {
            if !hook.pre_commit(&attempt)? {
                tracing::debug!(
                    bucket = %attempt.bucket_id,
                    stream = %attempt.stream_id,
                    commit_id = %attempt.commit_id,
                    "commit vetoed by pre-commit hook"
                );
                return Ok(None);
            }
        }

        let commit = self.inner.persistence.commit(attempt)?;

        for hook in self.inner.hooks.iter() {
            if let Err(error) = hook.post_commit(&commit) {
                tracing::warn!(
                    stream = %commit.stream_id,
                    commit_id = %commit.commit_id,
                    %error,
                    "post-commit hook failed; suppressed"
                );
            }
        }

        Ok(Some(commit))
    }

    /// The full persistence contract, hook-aware.
    ///
    /// Reads through this handle run the hooks' `select`; purge and
    /// delete-stream fan out to the hooks. This is the escape hatch for
    /// checkpoint iteration, snapshot management, and administration.
    pub fn advanced(&self) -> &dyn PersistStreams {
        &self.inner.persistence
    }
}

/// Resolves the "unbounded" sentinel at the facade boundary.
fn resolve_max(max_revision: StreamRevision) -> StreamRevision {
    if max_revision.is_none() {
        StreamRevision::MAX
    } else {
        max_revision
    }
}

// =============================================================================
// Tests
// =============================================================================
