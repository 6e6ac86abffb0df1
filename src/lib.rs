//! # GrudgeStore - Event-Sourcing Persistence
//!
//! GrudgeStore is an embeddable event store for DDD/CQRS applications that
//! derive state by folding events instead of mutating rows. It provides:
//!
//! - **Event sourcing primitives**: buckets, streams, revisions, a globally
//!   ordered commit log
//! - **Optimistic concurrency**: conflicts detected at commit time, no locks
//! - **Exactly-once appends**: duplicate commit ids are detected, never
//!   re-appended
//! - **A commit pipeline**: ordered hooks with veto, observation, and
//!   read-side selection
//! - **Snapshots**: cached folds that shortcut replay of long streams
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                   OptimisticEventStream                          │
//! │        (uncommitted buffer, revision tracking, one writer)       │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │ commit_changes / refresh
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         EventStore                               │
//! │   pre-commit hooks ─► persistence ─► post-commit hooks           │
//! │   (OptimisticCommitHook first, user hooks after, in order)       │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      HookedPersistence                           │
//! │          (reads run hook `select`, admin ops fan out)            │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │
//!                 ┌──────────────┴──────────────┐
//!                 ▼                             ▼
//!       ┌──────────────────┐          ┌──────────────────────┐
//!       │ SqlitePersistence│          │ InMemoryPersistence  │
//!       │  (durable, WAL)  │          │   (tests, ephemeral) │
//!       └──────────────────┘          └──────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! These hold everywhere and must never be violated:
//!
//! 1. **Gapless sequences**: a stream's durable commits are numbered
//!    1, 2, 3, … with no gaps
//! 2. **Revision arithmetic**: each commit advances the stream revision by
//!    exactly its event count
//! 3. **Global ordering**: checkpoint tokens strictly increase across all
//!    streams and are never reused
//! 4. **Idempotency**: one `(bucket, stream, commit_id)` maps to at most
//!    one durable commit
//!
//! ## Quick Start
//!
//! ```rust
//! use grudgestore::{CommitId, EventMessage, EventStore, InMemoryPersistence, StreamRevision};
//!
//! # fn main() -> grudgestore::Result<()> {
//! let store = EventStore::open(InMemoryPersistence::new())?;
//!
//! // Write: stage events, commit them as one atomic batch.
//! let mut stream = store.create_stream("default", "order-1");
//! stream.add(EventMessage::new(b"order placed".to_vec()))?;
//! stream.add(EventMessage::new(b"order paid".to_vec()))?;
//! stream.commit_changes(CommitId::random())?;
//!
//! // Read: reopen and fold.
//! let replay = store.open_stream(
//!     "default",
//!     "order-1",
//!     StreamRevision::FIRST,
//!     StreamRevision::NONE, // unbounded
//! )?;
//! assert_eq!(replay.committed_events().len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`error`]: the failure taxonomy for all operations
//! - [`types`]: domain types (streams, revisions, commits, snapshots)
//! - [`codec`]: commit payload packing and checksums
//! - [`persistence`]: the contract storage backends satisfy
//! - [`memory`] / [`storage`] + [`schema`]: the two shipped backends
//! - [`hooks`]: the pipeline hook trait and the optimistic concurrency hook
//! - [`pipeline`]: the hook-aware persistence decorator
//! - [`store`] / [`stream`]: the facade and the client-side stream

pub mod codec;

/// Error types for GrudgeStore operations.
pub mod error;

/// Pipeline hooks: interceptors over the commit and read paths.
pub mod hooks;

/// The in-memory persistence backend.
pub mod memory;

/// The abstract persistence contract.
pub mod persistence;

/// The hook-aware persistence decorator.
pub mod pipeline;

/// SQLite schema definitions and database initialization.
pub mod schema;

/// The SQLite persistence backend.
pub mod storage;

/// The event store facade.
pub mod store;

/// The client-side optimistic event stream.
pub mod stream;

/// Domain types for event sourcing.
pub mod types;

pub use error::{Error, Result};
pub use hooks::{OptimisticCommitHook, PipelineHook};
pub use memory::InMemoryPersistence;
pub use persistence::PersistStreams;
pub use pipeline::HookedPersistence;
pub use schema::Database;
pub use storage::SqlitePersistence;
pub use store::{EventStore, EventStoreBuilder};
pub use stream::OptimisticEventStream;

// Re-export commonly used domain types at the crate root.
pub use types::{
    BucketId, CheckpointToken, Commit, CommitAttempt, CommitId, CommitSequence, EventMessage,
    Headers, Snapshot, StreamHead, StreamId, StreamRevision,
};
