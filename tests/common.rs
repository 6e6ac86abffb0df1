#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use grudgestore::{
    BucketId, CommitAttempt, CommitId, CommitSequence, EventMessage, EventStore, Headers,
    InMemoryPersistence, PersistStreams, SqlitePersistence, StreamId, StreamRevision,
};

pub fn event(body: &[u8]) -> EventMessage {
    EventMessage::new(body.to_vec())
}

pub fn attempt(stream: &str, sequence: u64, revision: u64, bodies: &[&[u8]]) -> CommitAttempt {
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

pub fn memory_store() -> EventStore {
    EventStore::open(InMemoryPersistence::new()).expect("build store")
}

/// Two stores over one backend: two writer processes with separate hook
/// caches and shared durable state.
pub fn shared_backend_stores() -> (EventStore, EventStore) {
    let backend: Arc<dyn PersistStreams> = Arc::new(InMemoryPersistence::new());
    (
        EventStore::builder_shared(backend.clone())
            .build()
            .expect("build store a"),
        EventStore::builder_shared(backend).build().expect("build store b"),
    )
}

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

pub fn sqlite_store(path: &Path) -> EventStore {
    EventStore::open(SqlitePersistence::open(path).expect("open sqlite persistence"))
        .expect("build sqlite store")
}
