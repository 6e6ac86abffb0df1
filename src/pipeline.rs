//! # Hook-Aware Persistence Decorator
//!
//! [`HookedPersistence`] wraps any [`PersistStreams`] backend so that read
//! paths run each yielded commit through every hook's `select`, and admin
//! operations fan out to `on_purge` / `on_delete_stream`. It is composition,
//! not inheritance: the decorator and the raw backend satisfy the same
//! contract, and the facade hands the decorated form to anything that reads.
//!
//! Why it exists: hooks with caches (the optimistic hook above all) must see
//! the same commits on reads as they see on writes, or their view of a
//! stream head would drift from reality. Routing reads through `select`
//! keeps every hook's state warm no matter which path touched the data.
//!
//! Write paths pass through unchanged - the facade runs the pre/post chain
//! itself, around the persistence call, so a veto can stop the write before
//! the backend ever sees it.

use std::sync::Arc;

use crate::error::Result;
use crate::hooks::PipelineHook;
use crate::persistence::PersistStreams;
use crate::types::{
    BucketId, CheckpointToken, Commit, CommitAttempt, Snapshot, StreamHead, StreamId,
    StreamRevision,
};

/// A [`PersistStreams`] decorator that keeps the hook chain informed.
pub struct HookedPersistence {
    inner: Arc<dyn PersistStreams>,
    hooks: Arc<[Arc<dyn PipelineHook>]>,
}

impl HookedPersistence {
    /// Wraps a backend with a hook chain.
    pub fn new(inner: Arc<dyn PersistStreams>, hooks: Arc<[Arc<dyn PipelineHook>]>) -> Self {
        Self { inner, hooks }
    }

    /// Runs one commit through the hooks' `select`, left to right. The
    /// first hook returning `None` drops the commit.
    fn select(&self, commit: Commit) -> Option<Commit> {
        self.hooks
            .iter()
            .try_fold(commit, |commit, hook| hook.select(commit))
    }

    fn select_all(&self, commits: Vec<Commit>) -> Vec<Commit> {
        commits
            .into_iter()
            .filter_map(|commit| self.select(commit))
            .collect()
    }
}

impl PersistStreams for HookedPersistence {
    fn get_from(
        &self,
        bucket_id: &BucketId,
        stream_id: &StreamId,
        min_revision: StreamRevision,
        max_revision: StreamRevision,
    ) -> Result<Vec<Commit>> {
        let commits = self
            .inner
            .get_from(bucket_id, stream_id, min_revision, max_revision)?;
        Ok(self.select_all(commits))
    }

    fn get_from_checkpoint(
        &self,
        bucket_id: &BucketId,
        checkpoint: CheckpointToken,
    ) -> Result<Vec<Commit>> {
        let commits = self.inner.get_from_checkpoint(bucket_id, checkpoint)?;
        Ok(self.select_all(commits))
    }

    fn commit(&self, attempt: CommitAttempt) -> Result<Commit> {
        // Pre/post dispatch is the facade's job; the write itself is
        // untouched here.
        self.inner.commit(attempt)
    }

    fn get_snapshot(
        &self,
        bucket_id: &BucketId,
        stream_id: &StreamId,
        max_revision: StreamRevision,
    ) -> Result<Option<Snapshot>> {
        self.inner.get_snapshot(bucket_id, stream_id, max_revision)
    }

    fn add_snapshot(&self, snapshot: Snapshot) -> Result<bool> {
        self.inner.add_snapshot(snapshot)
    }

    fn streams_to_snapshot(
        &self,
        bucket_id: &BucketId,
        min_threshold: u64,
    ) -> Result<Vec<StreamHead>> {
        self.inner.streams_to_snapshot(bucket_id, min_threshold)
    }

    fn initialize(&self) -> Result<()> {
        self.inner.initialize()
    }

    fn purge(&self, bucket_id: Option<&BucketId>) -> Result<()> {
        self.inner.purge(bucket_id)?;
        for hook in self.hooks.iter() {
            hook.on_purge(bucket_id);
        }
        Ok(())
    }

    fn delete_stream(&self, bucket_id: &BucketId, stream_id: &StreamId) -> Result<()> {
        self.inner.delete_stream(bucket_id, stream_id)?;
        for hook in self.hooks.iter() {
            hook.on_delete_stream(bucket_id, stream_id);
        }
        Ok(())
    }

    fn drop_store(&self) -> Result<()> {
        self.inner.drop_store()?;
        for hook in self.hooks.iter() {
            hook.on_purge(None);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPersistence;
    use crate::types::{CommitId, CommitSequence, EventMessage, Headers};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Drops commits whose commit headers carry `"hidden"`.
    struct HidingHook {
        selected: AtomicUsize,
    }

    impl PipelineHook for HidingHook {
        fn select(&self, commit: Commit) -> Option<Commit> {
            self.selected.fetch_add(1, Ordering::SeqCst);
            if commit.headers.contains_key("hidden") {
                None
            } else {
                Some(commit)
            }
        }
    }

    fn attempt(stream: &str, sequence: u64, revision: u64, hidden: bool) -> CommitAttempt {
        let mut headers = Headers::new();
        if hidden {
            headers.insert("hidden".to_string(), serde_json::json!(true));
        }
        CommitAttempt {
            bucket_id: BucketId::default_bucket(),
            stream_id: StreamId::new(stream),
            stream_revision: StreamRevision::from_raw(revision),
            commit_id: CommitId::random(),
            commit_sequence: CommitSequence::from_raw(sequence),
            commit_stamp_ms: 0,
            headers,
            events: vec![EventMessage::new(b"e".to_vec())],
        }
    }

    fn decorated() -> (HookedPersistence, Arc<HidingHook>) {
        let hook = Arc::new(HidingHook {
            selected: AtomicUsize::new(0),
        });
        let hooks: Arc<[Arc<dyn PipelineHook>]> = Arc::from(vec![hook.clone() as Arc<dyn PipelineHook>]);
        let inner: Arc<dyn PersistStreams> = Arc::new(InMemoryPersistence::new());
        (HookedPersistence::new(inner, hooks), hook)
    }

    #[test]
    fn test_reads_run_select() {
        let (store, hook) = decorated();
        store.commit(attempt("s1", 1, 1, false)).unwrap();
        store.commit(attempt("s1", 2, 2, true)).unwrap();

        let visible = store
            .get_from(
                &BucketId::default_bucket(),
                &StreamId::new("s1"),
                StreamRevision::FIRST,
                StreamRevision::MAX,
            )
            .unwrap();

        assert_eq!(visible.len(), 1, "hidden commit is dropped");
        assert_eq!(hook.selected.load(Ordering::SeqCst), 2, "select saw both");
    }

    #[test]
    fn test_checkpoint_reads_run_select() {
        let (store, _hook) = decorated();
        store.commit(attempt("s1", 1, 1, true)).unwrap();
        store.commit(attempt("s2", 1, 1, false)).unwrap();

        let visible = store
            .get_from_checkpoint(&BucketId::default_bucket(), CheckpointToken::NONE)
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].stream_id.as_str(), "s2");
    }

    #[test]
    fn test_write_path_passes_through() {
        let (store, hook) = decorated();
        // A "hidden" commit still lands durably; select only shapes reads.
        store.commit(attempt("s1", 1, 1, true)).unwrap();
        assert_eq!(hook.selected.load(Ordering::SeqCst), 0);
    }
}
