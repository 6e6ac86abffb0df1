//! # Domain Types for GrudgeStore
//!
//! This module defines the core types used throughout GrudgeStore. They model
//! the event-sourcing domain: buckets, streams, revisions, checkpoints,
//! commits, and snapshots.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! We use the newtype pattern extensively - wrapping primitive types in
//! single-field structs. A `CheckpointToken` can never be passed where a
//! `StreamRevision` is expected, and function signatures document themselves.
//!
//! ## Invariants
//!
//! These types encode the store's ordering invariants:
//!
//! - [`CheckpointToken`]: strictly increasing across the whole store, never
//!   reused, never zero for a durable commit
//! - [`StreamRevision`]: strictly increasing per stream, starts at 1, no gaps
//! - [`CommitSequence`]: strictly increasing per stream, starts at 1, no gaps
//! - [`CommitId`]: unique per `(bucket, stream)`; a retry presenting a known
//!   id is a duplicate, never a new commit

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// Bucket and Stream Identification
// =============================================================================

/// A namespace for streams.
///
/// Streams with the same identifier in different buckets are completely
/// independent: separate revisions, separate sequences, separate snapshots.
/// Multi-tenant deployments typically map one tenant to one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId(String);

impl BucketId {
    /// The bucket used when callers don't care about namespacing.
    pub const DEFAULT: &'static str = "default";

    /// Creates a bucket id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the default bucket.
    pub fn default_bucket() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BucketId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for BucketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A human-readable identifier for an event stream.
///
/// In event sourcing, a stream holds the events of a single entity:
/// `"order-abc-123"`, `"account-checking-999"`. Within a bucket a stream is
/// the unit of revision tracking and optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Creates a new stream id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this stream id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Ordering Keys
// =============================================================================

/// The number of events ever committed to a stream.
///
/// # Invariants
///
/// - Strictly increases within a stream, no gaps
/// - The first event of a stream has revision 1
/// - After a commit, the stream revision equals the previous revision plus
///   the number of events in that commit
///
/// # Sentinels
///
/// `NONE` (0) doubles as "stream has no events" and, at the facade boundary,
/// as "no upper bound" for reads. The sentinel is resolved before any
/// persistence call; backends only ever see concrete bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamRevision(u64);

impl StreamRevision {
    /// The revision of the first event in a stream (1).
    pub const FIRST: StreamRevision = StreamRevision(1);

    /// Sentinel: "no events yet" (as a head) or "unbounded" (as a read bound).
    pub const NONE: StreamRevision = StreamRevision(0);

    /// The largest expressible revision; used as the resolved upper bound.
    pub const MAX: StreamRevision = StreamRevision(u64::MAX);

    /// Creates a revision from a raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw u64 value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the next revision.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Adds an offset to this revision.
    pub fn add(&self, count: u64) -> Self {
        Self(self.0 + count)
    }

    /// Returns true if this is the "no events" / "unbounded" sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StreamRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// The number of commits ever made to a stream.
///
/// Where [`StreamRevision`] counts events, `CommitSequence` counts the
/// atomic batches they arrived in. Durable commits of a stream form the
/// gapless sequence 1, 2, 3, …
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitSequence(u64);

impl CommitSequence {
    /// The sequence of a stream's first commit (1).
    pub const FIRST: CommitSequence = CommitSequence(1);

    /// Sentinel: the stream has no commits.
    pub const NONE: CommitSequence = CommitSequence(0);

    /// Creates a sequence from a raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw u64 value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the next sequence.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CommitSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A position in the store-global commit order.
///
/// # Invariants
///
/// - Strictly increases with each durable commit, across all streams
/// - Never reused, even after purges
/// - Assigned by the backend, never by the client
///
/// # Use Cases
///
/// - Catch-up readers: "give me every commit after token X"
/// - A total order across streams consistent with commit completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointToken(u64);

impl CheckpointToken {
    /// Sentinel meaning "from the beginning" in read APIs.
    ///
    /// Real tokens start at 1; passing `NONE` to a checkpoint read returns
    /// every commit in the bucket.
    pub const NONE: CheckpointToken = CheckpointToken(0);

    /// Creates a token from a raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw u64 value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CheckpointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Commit Identification (for Idempotency)
// =============================================================================

/// A client-chosen identity for a commit, unique per `(bucket, stream)`.
///
/// # Exactly-Once Semantics
///
/// A writer that times out cannot know whether its commit landed. Retrying
/// with the **same** commit id makes the retry safe: if the original
/// succeeded, the store reports a duplicate instead of appending a second
/// copy, and the stream treats that as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(Uuid);

impl CommitId {
    /// Generates a fresh random commit id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CommitId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// =============================================================================
// Events
// =============================================================================

/// Headers attached to commits and events: arbitrary JSON values keyed by
/// string. GrudgeStore never interprets them.
pub type Headers = serde_json::Map<String, serde_json::Value>;

/// A single domain event: headers plus an opaque body.
///
/// GrudgeStore is payload-agnostic - the body is just bytes. The client
/// chooses the serialization format (JSON, protobuf, messagepack, etc.) and
/// must produce a non-empty body; an event that says nothing is rejected at
/// [`OptimisticEventStream::add`](crate::stream::OptimisticEventStream::add).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Per-event metadata: correlation ids, causation ids, user info.
    pub headers: Headers,

    /// The event payload.
    pub body: Vec<u8>,
}

impl EventMessage {
    /// Creates an event with just a body and no headers.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Adds a header to this event (builder pattern).
    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }
}

// =============================================================================
// Commit Attempt and Commit
// =============================================================================

/// A client-built, transient batch of events on its way to the store.
///
/// The [`OptimisticEventStream`](crate::stream::OptimisticEventStream)
/// assembles attempts from its uncommitted buffer: the revision and sequence
/// are the stream's last observed head advanced by this batch, which is what
/// lets the backend detect a concurrent writer.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitAttempt {
    /// Bucket containing the target stream.
    pub bucket_id: BucketId,

    /// The target stream.
    pub stream_id: StreamId,

    /// The stream revision this attempt would produce
    /// (previous head + `events.len()`).
    pub stream_revision: StreamRevision,

    /// Client-chosen identity for idempotent retries.
    pub commit_id: CommitId,

    /// The commit sequence this attempt would produce (previous head + 1).
    pub commit_sequence: CommitSequence,

    /// Wall-clock stamp, milliseconds since the Unix epoch (UTC).
    pub commit_stamp_ms: u64,

    /// Commit-level headers.
    pub headers: Headers,

    /// Events to append. Must be non-empty.
    pub events: Vec<EventMessage>,
}

impl CommitAttempt {
    /// Checks the attempt's structural invariants.
    ///
    /// Called by the facade before any hook or backend sees the attempt, so
    /// malformed attempts fail fast with [`Error::InvalidAttempt`] and
    /// storage is never touched.
    pub fn validate(&self) -> Result<()> {
        if self.events.is_empty() {
            return Err(Error::InvalidAttempt("events must not be empty".to_string()));
        }
        if self.events.iter().any(|e| e.body.is_empty()) {
            return Err(Error::InvalidAttempt(
                "event bodies must not be empty".to_string(),
            ));
        }
        if self.commit_sequence == CommitSequence::NONE {
            return Err(Error::InvalidAttempt(
                "commit sequence must be at least 1".to_string(),
            ));
        }
        if self.stream_revision.as_raw() < self.events.len() as u64 {
            return Err(Error::InvalidAttempt(format!(
                "stream revision {} is smaller than the event count {}",
                self.stream_revision,
                self.events.len()
            )));
        }
        Ok(())
    }

    /// The revision of the first event in this attempt.
    pub fn first_event_revision(&self) -> StreamRevision {
        StreamRevision::from_raw(self.stream_revision.as_raw() - self.events.len() as u64 + 1)
    }

    /// The stream head revision this attempt was computed against.
    pub fn preceding_revision(&self) -> StreamRevision {
        StreamRevision::from_raw(self.stream_revision.as_raw() - self.events.len() as u64)
    }
}

/// A durable, store-ordered batch of events on a single stream.
///
/// This is the "output" form - what reads yield. It carries everything the
/// attempt carried plus the backend-assigned [`CheckpointToken`] that
/// linearizes commits across all streams.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// Store-global ordering key, assigned at append time.
    pub checkpoint_token: CheckpointToken,

    /// Bucket containing the stream.
    pub bucket_id: BucketId,

    /// The stream this commit belongs to.
    pub stream_id: StreamId,

    /// The stream revision after this commit.
    pub stream_revision: StreamRevision,

    /// The client-chosen commit identity.
    pub commit_id: CommitId,

    /// Position of this commit in the stream's commit sequence.
    pub commit_sequence: CommitSequence,

    /// Wall-clock stamp, milliseconds since the Unix epoch (UTC).
    pub commit_stamp_ms: u64,

    /// Commit-level headers.
    pub headers: Headers,

    /// The committed events, in append order.
    pub events: Vec<EventMessage>,
}

impl Commit {
    /// The revision of the first event in this commit.
    ///
    /// Event *i* (0-based) of the commit has revision
    /// `first_event_revision() + i`.
    pub fn first_event_revision(&self) -> StreamRevision {
        StreamRevision::from_raw(self.stream_revision.as_raw() - self.events.len() as u64 + 1)
    }
}

// =============================================================================
// Snapshots and Stream Heads
// =============================================================================

/// A cached fold of a stream's events up to some revision.
///
/// Snapshots shortcut replay: opening a stream from a snapshot loads only
/// commits with revisions above `stream_revision`. The payload is opaque to
/// GrudgeStore, exactly like event bodies. Multiple snapshots per stream may
/// coexist; reads pick the highest revision at or below the requested bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Bucket containing the stream.
    pub bucket_id: BucketId,

    /// The snapshotted stream.
    pub stream_id: StreamId,

    /// How many events are folded into the payload.
    pub stream_revision: StreamRevision,

    /// The folded state, serialized by the caller.
    pub payload: Vec<u8>,
}

impl Snapshot {
    /// Creates a snapshot.
    pub fn new(
        bucket_id: impl Into<BucketId>,
        stream_id: impl Into<StreamId>,
        stream_revision: StreamRevision,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            stream_id: stream_id.into(),
            stream_revision,
            payload: payload.into(),
        }
    }
}

/// The head position of a stream, with its most recent snapshot revision.
///
/// Produced by
/// [`PersistStreams::streams_to_snapshot`](crate::persistence::PersistStreams::streams_to_snapshot)
/// so snapshotting jobs can find streams whose replay cost has grown past a
/// threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHead {
    /// Bucket containing the stream.
    pub bucket_id: BucketId,

    /// The stream.
    pub stream_id: StreamId,

    /// Revision of the stream's newest event.
    pub head_revision: StreamRevision,

    /// Revision of the newest snapshot, or `NONE` if none exists.
    pub snapshot_revision: StreamRevision,
}

impl StreamHead {
    /// Events committed since the last snapshot.
    pub fn unsnapshotted(&self) -> u64 {
        self.head_revision.as_raw() - self.snapshot_revision.as_raw()
    }
}

// =============================================================================
// Tests
// =============================================================================
