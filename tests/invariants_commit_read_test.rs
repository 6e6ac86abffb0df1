mod common;

use grudgestore::{
    BucketId, CheckpointToken, CommitId, EventStore, PersistStreams, SqlitePersistence, StreamId,
    StreamRevision,
};

/// Runs the same assertions against both backends; the invariants are the
/// contract, not a backend detail.
fn each_store(f: impl Fn(EventStore)) {
    f(common::memory_store());

    let (_dir, path) = common::create_temp_db_file("invariants.db");
    f(common::sqlite_store(&path));
}

#[test]
fn commit_sequences_are_gapless_and_revisions_add_up() {
    each_store(|store| {
        let mut stream = store.create_stream("b1", "s1");
        stream.add(common::event(b"e1")).unwrap();
        stream.add(common::event(b"e2")).unwrap();
        stream.add(common::event(b"e3")).unwrap();
        stream.commit_changes(CommitId::random()).unwrap();

        stream.add(common::event(b"e4")).unwrap();
        stream.add(common::event(b"e5")).unwrap();
        stream.commit_changes(CommitId::random()).unwrap();

        stream.add(common::event(b"e6")).unwrap();
        stream.commit_changes(CommitId::random()).unwrap();

        let commits = store
            .advanced()
            .get_from(
                &BucketId::new("b1"),
                &StreamId::new("s1"),
                StreamRevision::FIRST,
                StreamRevision::MAX,
            )
            .unwrap();

        assert_eq!(commits.len(), 3);

        let mut previous_revision = 0;
        for (i, commit) in commits.iter().enumerate() {
            assert_eq!(
                commit.commit_sequence.as_raw(),
                (i + 1) as u64,
                "sequences form 1, 2, 3, ... with no gaps"
            );
            assert_eq!(
                commit.stream_revision.as_raw() - previous_revision,
                commit.events.len() as u64,
                "each commit advances the revision by exactly its event count"
            );
            previous_revision = commit.stream_revision.as_raw();
        }
        assert_eq!(previous_revision, 6);
    });
}

#[test]
fn fresh_stream_single_commit_lands_at_revision_two() {
    each_store(|store| {
        let mut stream = store.create_stream("b1", "s1");
        stream.add(common::event(b"E1")).unwrap();
        stream.add(common::event(b"E2")).unwrap();

        let commit = stream
            .commit_changes(CommitId::random())
            .unwrap()
            .expect("commit should land");

        assert_eq!(commit.stream_revision.as_raw(), 2);
        assert_eq!(commit.commit_sequence.as_raw(), 1);
        assert!(commit.checkpoint_token > CheckpointToken::NONE);
    });
}

#[test]
fn checkpoints_are_strictly_ordered_and_unique() {
    each_store(|store| {
        // Interleave commits across streams: s1, s2, s1, s3.
        for (stream_id, body) in [("s1", "a"), ("s2", "b"), ("s1", "c"), ("s3", "d")] {
            let mut stream = store
                .open_stream("b1", stream_id, StreamRevision::FIRST, StreamRevision::NONE)
                .unwrap();
            stream.add(common::event(body.as_bytes())).unwrap();
            stream.commit_changes(CommitId::random()).unwrap();
        }

        let commits = store
            .advanced()
            .get_from_checkpoint(&BucketId::new("b1"), CheckpointToken::NONE)
            .unwrap();

        assert_eq!(commits.len(), 4);
        // Commit-completion order, not stream order.
        let streams: Vec<&str> = commits.iter().map(|c| c.stream_id.as_str()).collect();
        assert_eq!(streams, vec!["s1", "s2", "s1", "s3"]);

        for pair in commits.windows(2) {
            assert!(
                pair[0].checkpoint_token < pair[1].checkpoint_token,
                "checkpoint tokens strictly increase"
            );
        }
    });
}

#[test]
fn checkpoint_iteration_resumes_after_a_token() {
    each_store(|store| {
        for i in 0..5u64 {
            let mut stream = store
                .open_stream(
                    "b1",
                    format!("s{i}").as_str(),
                    StreamRevision::FIRST,
                    StreamRevision::NONE,
                )
                .unwrap();
            stream.add(common::event(b"e")).unwrap();
            stream.commit_changes(CommitId::random()).unwrap();
        }

        let all = store
            .advanced()
            .get_from_checkpoint(&BucketId::new("b1"), CheckpointToken::NONE)
            .unwrap();
        assert_eq!(all.len(), 5);

        let resume_from = all[2].checkpoint_token;
        let tail = store
            .advanced()
            .get_from_checkpoint(&BucketId::new("b1"), resume_from)
            .unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail.iter().all(|c| c.checkpoint_token > resume_from));
    });
}

#[test]
fn get_from_returns_exactly_the_requested_revisions() {
    each_store(|store| {
        let mut stream = store.create_stream("b1", "s1");
        // Three commits: revisions 1-2, 3-4, 5.
        stream.add(common::event(b"e1")).unwrap();
        stream.add(common::event(b"e2")).unwrap();
        stream.commit_changes(CommitId::random()).unwrap();
        stream.add(common::event(b"e3")).unwrap();
        stream.add(common::event(b"e4")).unwrap();
        stream.commit_changes(CommitId::random()).unwrap();
        stream.add(common::event(b"e5")).unwrap();
        stream.commit_changes(CommitId::random()).unwrap();

        // [3, 4] intersects only the middle commit.
        let middle = store
            .advanced()
            .get_from(
                &BucketId::new("b1"),
                &StreamId::new("s1"),
                StreamRevision::from_raw(3),
                StreamRevision::from_raw(4),
            )
            .unwrap();
        assert_eq!(middle.len(), 1);
        assert_eq!(middle[0].commit_sequence.as_raw(), 2);

        // [2, 3] spans the boundary of the first two commits.
        let boundary = store
            .advanced()
            .get_from(
                &BucketId::new("b1"),
                &StreamId::new("s1"),
                StreamRevision::from_raw(2),
                StreamRevision::from_raw(3),
            )
            .unwrap();
        assert_eq!(boundary.len(), 2);

        // The open window clips replayed events to exactly [2, 3].
        let windowed = store
            .open_stream(
                "b1",
                "s1",
                StreamRevision::from_raw(2),
                StreamRevision::from_raw(3),
            )
            .unwrap();
        let bodies: Vec<&[u8]> = windowed
            .committed_events()
            .iter()
            .map(|e| e.body.as_slice())
            .collect();
        assert_eq!(bodies, vec![&b"e2"[..], b"e3"]);
    });
}

#[test]
fn buckets_isolate_streams_with_the_same_id() {
    each_store(|store| {
        let mut tenant_a = store.create_stream("tenant-a", "order-1");
        tenant_a.add(common::event(b"a1")).unwrap();
        tenant_a.commit_changes(CommitId::random()).unwrap();

        let mut tenant_b = store.create_stream("tenant-b", "order-1");
        tenant_b.add(common::event(b"b1")).unwrap();
        tenant_b.add(common::event(b"b2")).unwrap();
        tenant_b.commit_changes(CommitId::random()).unwrap();

        assert_eq!(tenant_a.stream_revision().as_raw(), 1);
        assert_eq!(tenant_b.stream_revision().as_raw(), 2);

        let a_commits = store
            .advanced()
            .get_from_checkpoint(&BucketId::new("tenant-a"), CheckpointToken::NONE)
            .unwrap();
        assert_eq!(a_commits.len(), 1);
        assert_eq!(a_commits[0].events.len(), 1);
    });
}

#[test]
fn sqlite_and_memory_agree_on_replayed_history() {
    let (_dir, path) = common::create_temp_db_file("parity.db");
    let sqlite = common::sqlite_store(&path);
    let memory = common::memory_store();

    for store in [&sqlite, &memory] {
        let mut stream = store.create_stream("b1", "s1");
        stream.add(common::event(b"e1").with_header("kind", serde_json::json!("Opened"))).unwrap();
        stream.add(common::event(b"e2")).unwrap();
        stream.set_header("source", serde_json::json!("import"));
        stream.commit_changes(CommitId::random()).unwrap();
    }

    let from_sqlite = sqlite
        .open_stream("b1", "s1", StreamRevision::FIRST, StreamRevision::NONE)
        .unwrap();
    let from_memory = memory
        .open_stream("b1", "s1", StreamRevision::FIRST, StreamRevision::NONE)
        .unwrap();

    assert_eq!(from_sqlite.committed_events(), from_memory.committed_events());
    assert_eq!(from_sqlite.committed_headers(), from_memory.committed_headers());
    assert_eq!(from_sqlite.stream_revision(), from_memory.stream_revision());
}

#[test]
fn direct_persistence_commit_enforces_the_same_invariants() {
    let store = SqlitePersistence::open_in_memory().unwrap();

    let first = common::attempt("s1", 1, 2, &[b"e1", b"e2"]);
    store.commit(first).unwrap();

    // A gap in the sequence can never become durable.
    let gap = common::attempt("s1", 3, 4, &[b"e3", b"e4"]);
    assert!(matches!(
        store.commit(gap),
        Err(grudgestore::Error::Conflict { .. })
    ));
}
