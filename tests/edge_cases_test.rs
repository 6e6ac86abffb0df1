mod common;

use grudgestore::{
    BucketId, CheckpointToken, CommitId, Error, EventMessage, PersistStreams, StreamRevision,
};

#[test]
fn max_revision_sentinel_means_unbounded() {
    let store = common::memory_store();

    let mut stream = store.create_stream("b", "s");
    for body in [&b"e1"[..], b"e2", b"e3"] {
        stream.add(common::event(body)).unwrap();
    }
    stream.commit_changes(CommitId::random()).unwrap();

    let via_sentinel = store
        .open_stream("b", "s", StreamRevision::FIRST, StreamRevision::NONE)
        .unwrap();
    let via_max = store
        .open_stream("b", "s", StreamRevision::FIRST, StreamRevision::MAX)
        .unwrap();

    assert_eq!(via_sentinel.committed_events(), via_max.committed_events());
    assert_eq!(via_sentinel.stream_revision(), via_max.stream_revision());
}

#[test]
fn windowed_stream_still_commits_on_the_real_head() {
    let store = common::memory_store();

    let mut writer = store.create_stream("b", "s");
    for body in [&b"e1"[..], b"e2", b"e3", b"e4", b"e5"] {
        writer.add(common::event(body)).unwrap();
    }
    writer.commit_changes(CommitId::random()).unwrap();

    // Replay only [1, 2]; the head still reflects the full durable stream.
    let mut windowed = store
        .open_stream("b", "s", StreamRevision::FIRST, StreamRevision::from_raw(2))
        .unwrap();
    assert_eq!(windowed.committed_events().len(), 2);
    assert_eq!(windowed.stream_revision().as_raw(), 5);

    windowed.add(common::event(b"e6")).unwrap();
    let commit = windowed
        .commit_changes(CommitId::random())
        .unwrap()
        .expect("commit from a windowed stream");
    assert_eq!(commit.stream_revision.as_raw(), 6);
    assert_eq!(commit.commit_sequence.as_raw(), 2);
}

#[test]
fn headers_alone_do_not_commit() {
    let store = common::memory_store();

    let mut stream = store.create_stream("b", "s");
    stream.set_header("who", serde_json::json!("nobody"));

    assert!(stream.commit_changes(CommitId::random()).unwrap().is_none());

    let history = store
        .advanced()
        .get_from_checkpoint(&BucketId::new("b"), CheckpointToken::NONE)
        .unwrap();
    assert!(history.is_empty(), "a commit needs at least one event");
}

#[test]
fn handcrafted_attempts_are_validated_before_any_hook_or_backend() {
    let store = common::memory_store();

    let mut empty_events = common::attempt("s", 1, 1, &[b"e"]);
    empty_events.events.clear();
    assert!(matches!(
        store.commit(empty_events),
        Err(Error::InvalidAttempt(_))
    ));

    let mut empty_body = common::attempt("s", 1, 1, &[b"e"]);
    empty_body.events[0] = EventMessage::new(Vec::new());
    assert!(matches!(
        store.commit(empty_body),
        Err(Error::InvalidAttempt(_))
    ));

    let zero_sequence = common::attempt("s", 0, 1, &[b"e"]);
    assert!(matches!(
        store.commit(zero_sequence),
        Err(Error::InvalidAttempt(_))
    ));

    let undersized_revision = common::attempt("s", 1, 1, &[b"e1", b"e2"]);
    assert!(matches!(
        store.commit(undersized_revision),
        Err(Error::InvalidAttempt(_))
    ));

    // Nothing above reached storage.
    let history = store
        .advanced()
        .get_from_checkpoint(&BucketId::default_bucket(), CheckpointToken::NONE)
        .unwrap();
    assert!(history.is_empty());
}

#[test]
fn purging_one_bucket_leaves_the_others() {
    let store = common::memory_store();

    for bucket in ["tenant-a", "tenant-b"] {
        let mut stream = store.create_stream(bucket, "s");
        stream.add(common::event(b"e")).unwrap();
        stream.commit_changes(CommitId::random()).unwrap();
    }

    store.advanced().purge(Some(&BucketId::new("tenant-a"))).unwrap();

    let purged = store
        .advanced()
        .get_from_checkpoint(&BucketId::new("tenant-a"), CheckpointToken::NONE)
        .unwrap();
    assert!(purged.is_empty());

    let kept = store
        .advanced()
        .get_from_checkpoint(&BucketId::new("tenant-b"), CheckpointToken::NONE)
        .unwrap();
    assert_eq!(kept.len(), 1);

    // tenant-a can be rebuilt from scratch after the purge.
    let mut rebuilt = store.create_stream("tenant-a", "s");
    rebuilt.add(common::event(b"e-again")).unwrap();
    let commit = rebuilt
        .commit_changes(CommitId::random())
        .unwrap()
        .expect("recreate after purge");
    assert_eq!(commit.stream_revision.as_raw(), 1);
}

#[test]
fn commit_headers_ride_along_on_checkpoint_reads() {
    let store = common::memory_store();

    let mut stream = store.create_stream("b", "s");
    stream.add(common::event(b"e")).unwrap();
    stream.set_header("correlation", serde_json::json!("req-77"));
    stream.commit_changes(CommitId::random()).unwrap();

    let commits = store
        .advanced()
        .get_from_checkpoint(&BucketId::new("b"), CheckpointToken::NONE)
        .unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].headers["correlation"], serde_json::json!("req-77"));
}

#[test]
fn commit_stamps_are_populated() {
    let store = common::memory_store();

    let mut stream = store.create_stream("b", "s");
    stream.add(common::event(b"e")).unwrap();
    let commit = stream.commit_changes(CommitId::random()).unwrap().unwrap();

    // Sanity bound only: after 2020-01-01 in Unix milliseconds.
    assert!(commit.commit_stamp_ms > 1_577_836_800_000);
}
