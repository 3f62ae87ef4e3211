//! Change lifecycle behavior against in-memory stores and a fake directory.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;

use dirsync_core::model::ChangeCandidate;
use dirsync_core::store::ChangeStore;
use dirsync_core::{Change, ChangeLifecycle, ChangeStatus, SyncError};

use common::{target_record, FakeTarget, InMemoryAuditTrail, InMemoryChangeStore};

struct Fixture {
    store: Arc<InMemoryChangeStore>,
    audit: Arc<InMemoryAuditTrail>,
    target: Arc<FakeTarget>,
    lifecycle: ChangeLifecycle,
}

fn fixture(target: FakeTarget) -> Fixture {
    let store = Arc::new(InMemoryChangeStore::default());
    let audit = Arc::new(InMemoryAuditTrail::default());
    let target = Arc::new(target);
    let lifecycle = ChangeLifecycle::new(store.clone(), audit.clone(), target.clone());
    Fixture {
        store,
        audit,
        target,
        lifecycle,
    }
}

async fn seed(fixture: &Fixture, candidate: ChangeCandidate) -> Change {
    fixture
        .store
        .upsert_candidates(std::slice::from_ref(&candidate))
        .await
        .unwrap();
    fixture.store.all().pop().unwrap()
}

fn email_mismatch(identifier: &str, source: &str, target: &str) -> ChangeCandidate {
    ChangeCandidate::field_mismatch(identifier, "email", source, target, json!({}))
}

#[tokio::test]
async fn approve_applies_field_mismatch_to_target() {
    let fx = fixture(FakeTarget::with_records(vec![target_record(
        "carol",
        "old@x.com",
        "Carol C",
        "C",
    )]));
    let change = seed(&fx, email_mismatch("carol", "c@x.com", "old@x.com")).await;

    let applied = fx.lifecycle.approve(change.id, "admin").await.unwrap();

    assert_eq!(applied.status, ChangeStatus::Applied);
    assert_eq!(applied.approved_by.as_deref(), Some("admin"));
    assert!(applied.applied_at.is_some());
    assert!(applied.error_message.is_none());

    let records = fx.target.records.lock().unwrap();
    assert_eq!(records[0].mail, "c@x.com");
    drop(records);

    let actions = fx.audit.actions();
    assert!(actions.contains(&"change_approved".to_string()));
    assert!(actions.contains(&"change_applied".to_string()));
}

#[tokio::test]
async fn failed_apply_leaves_change_approved_with_error() {
    let fx = fixture(FakeTarget::with_records(vec![target_record(
        "carol",
        "old@x.com",
        "Carol C",
        "C",
    )]));
    fx.target.fail_update.store(true, Ordering::SeqCst);
    let change = seed(&fx, email_mismatch("carol", "c@x.com", "old@x.com")).await;

    let approved = fx.lifecycle.approve(change.id, "admin").await.unwrap();
    assert_eq!(approved.status, ChangeStatus::Approved);
    assert!(approved.error_message.is_some());
    assert!(fx.audit.actions().contains(&"change_apply_failed".to_string()));

    // Approved is not rejectable.
    let err = fx.lifecycle.reject(change.id, "admin", None).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTransition { .. }));

    // Retry once the directory recovers; the stale error is cleared.
    fx.target.fail_update.store(false, Ordering::SeqCst);
    let applied = fx.lifecycle.apply(change.id, "admin").await.unwrap();
    assert_eq!(applied.status, ChangeStatus::Applied);
    assert!(applied.error_message.is_none());
}

#[tokio::test]
async fn reject_never_touches_the_target() {
    let fx = fixture(FakeTarget::with_records(vec![target_record(
        "carol",
        "old@x.com",
        "Carol C",
        "C",
    )]));
    let change = seed(&fx, email_mismatch("carol", "c@x.com", "old@x.com")).await;

    let rejected = fx
        .lifecycle
        .reject(change.id, "admin", Some("value is correct downstream"))
        .await
        .unwrap();

    assert_eq!(rejected.status, ChangeStatus::Rejected);
    assert_eq!(fx.target.mutations(), 0);
    assert!(fx.audit.actions().contains(&"change_rejected".to_string()));

    // Terminal: no further transitions.
    let err = fx.lifecycle.approve(change.id, "admin").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTransition { .. }));
}

#[tokio::test]
async fn approving_orphan_deletes_the_entry() {
    let record = target_record("bob", "b@x.com", "Bob B", "B");
    let fx = fixture(FakeTarget::with_records(vec![record.clone()]));
    let change = seed(
        &fx,
        ChangeCandidate::orphan("bob", serde_json::to_string(&record).unwrap(), json!({})),
    )
    .await;

    let applied = fx.lifecycle.approve(change.id, "admin").await.unwrap();

    assert_eq!(applied.status, ChangeStatus::Applied);
    assert_eq!(fx.target.deletes.load(Ordering::SeqCst), 1);
    assert!(fx.target.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn approving_inactive_user_mutates_nothing() {
    let fx = fixture(FakeTarget::default());
    let change = seed(&fx, ChangeCandidate::inactive_user("dave", json!({}))).await;

    let applied = fx.lifecycle.approve(change.id, "admin").await.unwrap();

    assert_eq!(applied.status, ChangeStatus::Applied);
    assert_eq!(fx.target.mutations(), 0);
}

#[tokio::test]
async fn apply_requires_approved_status() {
    let fx = fixture(FakeTarget::default());
    let change = seed(&fx, email_mismatch("carol", "c@x.com", "old@x.com")).await;

    let err = fx.lifecycle.apply(change.id, "admin").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTransition { .. }));
    assert_eq!(fx.target.mutations(), 0);
}

#[tokio::test]
async fn store_transitions_never_regress_status() {
    // Two operators race: the approve lands first, the reject must not
    // move the row backwards even when issued straight against the store.
    let fx = fixture(FakeTarget::default());
    let change = seed(&fx, email_mismatch("carol", "c@x.com", "old@x.com")).await;

    fx.store.mark_approved(change.id, "first").await.unwrap();

    let err = fx.store.mark_rejected(change.id, "second").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTransition { .. }));
    assert_eq!(fx.store.all()[0].status, ChangeStatus::Approved);

    // Apply only transitions an approved row.
    let fresh = seed(&fx, email_mismatch("erin", "e@x.com", "old@x.com")).await;
    let err = fx.store.mark_applied(fresh.id).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTransition { .. }));
    assert_eq!(fx.store.all()[1].status, ChangeStatus::Pending);
}

#[tokio::test]
async fn unknown_change_id_is_reported() {
    let fx = fixture(FakeTarget::default());
    let id = uuid::Uuid::new_v4();

    let err = fx.lifecycle.approve(id, "admin").await.unwrap_err();
    assert!(matches!(err, SyncError::ChangeNotFound { change_id } if change_id == id));
}
