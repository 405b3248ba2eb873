//! Integration tests for local-first comments: optimistic adds and likes,
//! rollback, stale fallback, and superseded loads.
//!
//! Each test gets its own in-memory SQLite cache and scripted remote.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{anonymous_session, comment, settings, signed_in_session, test_cache, FakeRemote};
use iblog_sync::remote::RemoteError;
use iblog_sync::storage::{CommentId, Database, PersistedCommentCache};
use iblog_sync::sync::{AddSubmission, CommentSyncEngine, LoadState};
use iblog_sync::{SessionContext, SyncError};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

async fn engine(
    session: &SessionContext,
    remote: Arc<FakeRemote>,
) -> CommentSyncEngine<FakeRemote> {
    CommentSyncEngine::new(session, remote, test_cache().await)
}

fn three_comments() -> Vec<iblog_sync::storage::CommentRecord> {
    vec![comment(3, "third"), comment(2, "second"), comment(1, "first")]
}

// ============================================================================
// Load
// ============================================================================

#[tokio::test]
async fn test_load_writes_through_cache() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&anonymous_session(), remote).await;

    assert_eq!(engine.state(42), LoadState::Idle);
    let view = engine.load(42).await.unwrap();

    assert_eq!(view.records.len(), 3);
    assert!(!view.stale);
    assert!(view.error.is_none());
    assert_eq!(engine.state(42), LoadState::Loaded { stale: false });
    assert_eq!(engine.cache().read(42).await.unwrap(), view.records);
}

#[tokio::test]
async fn test_failed_load_delivers_stale_cache_and_error() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&anonymous_session(), Arc::clone(&remote)).await;
    engine.load(42).await.unwrap();

    remote.set_offline(true);
    let view = engine.load(42).await.unwrap();

    assert_eq!(view.records.len(), 3);
    assert!(view.stale);
    assert!(matches!(
        view.error,
        Some(SyncError::NetworkFailure(RemoteError::HttpStatus(503)))
    ));
    assert_eq!(engine.state(42), LoadState::Loaded { stale: true });
}

#[tokio::test]
async fn test_failed_load_with_empty_cache_settles_stale() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_offline(true);
    let mut engine = engine(&anonymous_session(), remote).await;

    let view = engine.load(7).await.unwrap();
    assert!(view.records.is_empty());
    assert!(view.stale);
    assert!(matches!(
        view.error,
        Some(SyncError::NetworkFailure(RemoteError::HttpStatus(503)))
    ));
    assert_eq!(engine.state(7), LoadState::Loaded { stale: true });
}

#[tokio::test]
async fn test_superseded_load_result_is_discarded() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&anonymous_session(), remote).await;

    let first = engine.begin_load(42);
    let first = engine.dispatch_load(first);
    let second = engine.begin_load(42);
    let second = engine.dispatch_load(second);

    let (first, second) = tokio::join!(first, second);
    assert!(engine.finish_load(first).await.unwrap().is_none());
    assert_eq!(engine.state(42), LoadState::Loading);

    let view = engine.finish_load(second).await.unwrap().unwrap();
    assert_eq!(view.records.len(), 3);
}

#[tokio::test]
async fn test_rescheduled_load_delivers_once() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&anonymous_session(), remote).await;
    let (tx, mut rx) = mpsc::channel(4);

    let first = engine.schedule_load(42, Some(Duration::from_millis(200)), tx.clone());
    let second = engine.schedule_load(42, Some(Duration::from_millis(10)), tx);
    assert!(second > first);

    let fetch = rx.recv().await.unwrap();
    assert_eq!(fetch.generation, second);
    let view = engine.finish_load(fetch).await.unwrap().unwrap();
    assert_eq!(view.records.len(), 3);

    // The first task was aborted and dropped its sender
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_scheduled_load_uses_configured_delay() {
    let mut settings = settings(10);
    settings.comment_load_delay = Duration::from_millis(300);
    let session = SessionContext::anonymous(settings);
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&session, remote).await;
    let (tx, mut rx) = mpsc::channel(1);

    let generation = engine.schedule_load(42, None, tx);
    assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
        .await
        .is_err());

    let fetch = rx.recv().await.unwrap();
    assert_eq!(fetch.generation, generation);
    assert_eq!(engine.finish_load(fetch).await.unwrap().unwrap().records.len(), 3);
}

#[tokio::test]
async fn test_cancel_scheduled_load_returns_to_idle() {
    let remote = Arc::new(FakeRemote::new());
    let mut engine = engine(&anonymous_session(), remote).await;
    let (tx, mut rx) = mpsc::channel(1);

    engine.schedule_load(5, Some(Duration::from_millis(50)), tx);
    assert_eq!(engine.state(5), LoadState::Loading);
    engine.cancel_load(5);

    assert_eq!(engine.state(5), LoadState::Idle);
    assert!(rx.recv().await.is_none());
}

// ============================================================================
// Add
// ============================================================================

#[tokio::test]
async fn test_optimistic_add_visible_before_remote_then_confirmed() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&signed_in_session(), Arc::clone(&remote)).await;
    engine.load(42).await.unwrap();

    let AddSubmission::Pending(pending) = engine.add(42, "  nice post ").await.unwrap() else {
        panic!("signed-in add should be pending");
    };
    let correlation = pending.correlation_id().unwrap();

    let shown = engine.comments(42).await.unwrap();
    assert_eq!(shown.len(), 4);
    assert!(shown[0].pending);
    assert_eq!(shown[0].body, "nice post");
    assert_eq!(shown[0].author_name, "alice");
    // Remote has not been called yet
    assert_eq!(remote.remote_comments(42).len(), 3);

    let resolution = engine.dispatch_add(pending).await;
    let confirmed = engine.resolve_add(resolution).await.unwrap();
    assert!(!confirmed.pending);
    assert!(confirmed.id.server_id().is_some());

    let records = engine.comments(42).await.unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(
        records
            .iter()
            .filter(|r| r.correlation_id == Some(correlation))
            .count(),
        1
    );
    assert!(records.iter().all(|r| !r.pending));
}

#[tokio::test]
async fn test_rejected_add_rolls_back_and_is_not_resurrected() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    remote.set_reject_writes(true);
    let mut engine = engine(&signed_in_session(), Arc::clone(&remote)).await;
    engine.load(42).await.unwrap();

    let err = engine.add_and_sync(42, "spam?").await.unwrap_err();
    let SyncError::ReconciliationFailure {
        correlation_id,
        original_body,
        cause,
    } = err
    else {
        panic!("expected reconciliation failure");
    };
    assert!(correlation_id.is_some());
    assert_eq!(original_body.as_deref(), Some("spam?"));
    assert!(matches!(cause, RemoteError::Rejected(_)));

    assert_eq!(engine.comments(42).await.unwrap().len(), 3);
    let view = engine.load(42).await.unwrap();
    assert_eq!(view.records.len(), 3);
    assert!(view.records.iter().all(|r| r.body != "spam?"));
}

#[tokio::test]
async fn test_anonymous_add_is_local_only_and_dropped_by_reload() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&anonymous_session(), Arc::clone(&remote)).await;
    engine.load(42).await.unwrap();

    remote.set_offline(true);
    let submission = engine.add(42, "nice post").await.unwrap();
    let AddSubmission::LocalOnly(record) = submission else {
        panic!("anonymous add should stay local");
    };
    assert!(record.pending);
    assert!(record.local_only);
    assert_eq!(record.author_id, None);

    let shown = engine.comments(42).await.unwrap();
    assert_eq!(shown.len(), 4);
    assert_eq!(shown[0], record);

    remote.set_offline(false);
    let view = engine.load(42).await.unwrap();
    let bodies: Vec<_> = view.records.iter().map(|r| r.body.as_str()).collect();
    assert_eq!(bodies, vec!["third", "second", "first"]);
    assert!(remote.remote_comments(42).iter().all(|r| r.body != "nice post"));
}

#[tokio::test]
async fn test_load_during_add_keeps_pending_without_duplicates() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&signed_in_session(), Arc::clone(&remote)).await;

    let AddSubmission::Pending(pending) = engine.add(42, "racing").await.unwrap() else {
        panic!("expected pending");
    };

    // Refresh lands before the add resolves
    let view = engine.load(42).await.unwrap();
    assert_eq!(view.records.len(), 4);
    assert!(view.records[0].pending);

    let resolution = engine.dispatch_add(pending).await;
    engine.resolve_add(resolution).await.unwrap();

    // Server now has it too; a reload must not show it twice
    let view = engine.load(42).await.unwrap();
    assert_eq!(view.records.len(), 4);
    assert_eq!(
        view.records.iter().filter(|r| r.body == "racing").count(),
        1
    );
}

#[tokio::test]
async fn test_pending_add_survives_restart() {
    let db = Database::open(":memory:").await.unwrap();
    let remote = Arc::new(FakeRemote::new());
    let session = signed_in_session();

    let mut engine = CommentSyncEngine::new(
        &session,
        Arc::clone(&remote),
        PersistedCommentCache::new(db.clone(), 4),
    );
    engine.add(9, "draft").await.unwrap();
    drop(engine);

    // Fresh in-memory view over the same database
    let cache = PersistedCommentCache::new(db, 4);
    let records = cache.read(9).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].pending);
}

#[tokio::test]
async fn test_unsent_add_is_reported_after_restart_and_can_be_resent() {
    let db = Database::open(":memory:").await.unwrap();
    let remote = Arc::new(FakeRemote::new().with_comments(9, vec![comment(1, "first")]));
    let session = signed_in_session();

    let mut engine = CommentSyncEngine::new(
        &session,
        Arc::clone(&remote),
        PersistedCommentCache::new(db.clone(), 4),
    );
    let correlation = engine
        .add(9, "my draft")
        .await
        .unwrap()
        .record()
        .correlation_id
        .unwrap();
    drop(engine);

    let mut engine = CommentSyncEngine::new(
        &session,
        Arc::clone(&remote),
        PersistedCommentCache::new(db, 4),
    );
    let view = engine.load(9).await.unwrap();
    let bodies: Vec<_> = view.records.iter().map(|r| r.body.as_str()).collect();
    assert_eq!(bodies, vec!["my draft", "first"]);
    assert_eq!(view.orphaned.len(), 1);
    assert_eq!(view.orphaned[0].body, "my draft");
    assert_eq!(view.orphaned[0].correlation_id, Some(correlation));

    // Still there on the next refresh
    let view = engine.load(9).await.unwrap();
    assert_eq!(view.orphaned.len(), 1);

    let pending = engine.resubmit(9, correlation).await.unwrap();
    let resolution = engine.dispatch_add(pending).await;
    let confirmed = engine.resolve_add(resolution).await.unwrap();
    assert!(!confirmed.pending);
    assert_eq!(confirmed.body, "my draft");

    let view = engine.load(9).await.unwrap();
    assert!(view.orphaned.is_empty());
    assert_eq!(
        view.records.iter().filter(|r| r.body == "my draft").count(),
        1
    );
}

#[tokio::test]
async fn test_unsent_add_that_reached_server_is_not_orphaned() {
    let db = Database::open(":memory:").await.unwrap();
    let remote = Arc::new(FakeRemote::new());
    let session = signed_in_session();

    let mut engine = CommentSyncEngine::new(
        &session,
        Arc::clone(&remote),
        PersistedCommentCache::new(db.clone(), 4),
    );
    let AddSubmission::Pending(pending) = engine.add(9, "landed").await.unwrap() else {
        panic!("expected pending");
    };
    // The write reaches the server but the answer is never applied
    let _lost = engine.dispatch_add(pending).await;
    drop(engine);

    let mut engine = CommentSyncEngine::new(&session, remote, PersistedCommentCache::new(db, 4));
    let view = engine.load(9).await.unwrap();
    assert!(view.orphaned.is_empty());
    assert_eq!(view.records.len(), 1);
    assert!(!view.records[0].pending);
}

#[tokio::test]
async fn test_discarded_orphan_returns_its_text() {
    let db = Database::open(":memory:").await.unwrap();
    let remote = Arc::new(FakeRemote::new());
    let session = signed_in_session();

    let mut engine = CommentSyncEngine::new(
        &session,
        Arc::clone(&remote),
        PersistedCommentCache::new(db.clone(), 4),
    );
    let correlation = engine
        .add(9, "never mind")
        .await
        .unwrap()
        .record()
        .correlation_id
        .unwrap();
    drop(engine);

    let mut engine = CommentSyncEngine::new(&session, remote, PersistedCommentCache::new(db, 4));
    assert_eq!(engine.load(9).await.unwrap().orphaned.len(), 1);

    let original = engine.discard_pending(9, correlation).await.unwrap();
    assert_eq!(original.body, "never mind");
    assert!(engine.comments(9).await.unwrap().is_empty());
    assert!(matches!(
        engine.discard_pending(9, correlation).await,
        Err(SyncError::NotFound)
    ));
}

#[tokio::test]
async fn test_blank_comment_rejected() {
    let mut engine = engine(&signed_in_session(), Arc::new(FakeRemote::new())).await;
    let err = engine.add(1, "   \n").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput(_)));
    assert!(engine.comments(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sign_out_makes_next_add_local() {
    let session = signed_in_session();
    let mut engine = engine(&session, Arc::new(FakeRemote::new())).await;

    session.teardown();
    let submission = engine.add(1, "after logout").await.unwrap();
    assert!(matches!(submission, AddSubmission::LocalOnly(_)));
}

// ============================================================================
// Like
// ============================================================================

#[tokio::test]
async fn test_like_increments_locally_and_remotely() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&signed_in_session(), Arc::clone(&remote)).await;
    engine.load(42).await.unwrap();

    let ticket = engine.begin_like(&CommentId::server(2)).await.unwrap();
    let optimistic = engine.comments(42).await.unwrap();
    assert_eq!(optimistic[1].like_count, 1);

    let resolution = engine.dispatch_like(ticket).await;
    let record = engine.resolve_like(resolution).await.unwrap();
    assert_eq!(record.like_count, 1);
    assert_eq!(remote.remote_comments(42)[1].like_count, 1);
}

#[tokio::test]
async fn test_rejected_like_is_reverted() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&signed_in_session(), Arc::clone(&remote)).await;
    engine.load(42).await.unwrap();

    remote.set_reject_writes(true);
    let err = engine.like(&CommentId::server(3)).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::ReconciliationFailure {
            correlation_id: None,
            ..
        }
    ));

    let records = engine.comments(42).await.unwrap();
    assert_eq!(records[0].like_count, 0);
}

#[tokio::test]
async fn test_rejected_like_after_refresh_keeps_server_count() {
    let mut liked = comment(1, "popular");
    liked.like_count = 5;
    let remote = Arc::new(FakeRemote::new().with_comments(42, vec![liked]));
    let mut engine = engine(&signed_in_session(), Arc::clone(&remote)).await;
    engine.load(42).await.unwrap();

    let ticket = engine.begin_like(&CommentId::server(1)).await.unwrap();
    assert_eq!(engine.comments(42).await.unwrap()[0].like_count, 6);

    // A refresh lands before the like resolves and brings the server count
    engine.load(42).await.unwrap();
    assert_eq!(engine.comments(42).await.unwrap()[0].like_count, 5);

    remote.set_reject_writes(true);
    let resolution = engine.dispatch_like(ticket).await;
    assert!(engine.resolve_like(resolution).await.is_err());
    assert_eq!(engine.comments(42).await.unwrap()[0].like_count, 5);
}

#[tokio::test]
async fn test_like_unknown_or_provisional_comment_is_not_found() {
    let remote = Arc::new(FakeRemote::new().with_comments(42, three_comments()));
    let mut engine = engine(&anonymous_session(), remote).await;
    engine.load(42).await.unwrap();

    assert!(matches!(
        engine.like(&CommentId::server(999)).await,
        Err(SyncError::NotFound)
    ));

    let AddSubmission::LocalOnly(local) = engine.add(42, "mine").await.unwrap() else {
        panic!("expected local-only add");
    };
    assert!(matches!(
        engine.like(&local.id).await,
        Err(SyncError::NotFound)
    ));
    assert_eq!(engine.comments(42).await.unwrap()[0].like_count, 0);
}
