//! Integration tests for identity reconciliation.
//!
//! Tests cover:
//! - Anonymous creation, key attachment and idempotent resolves
//! - Account linking and the anonymous-to-authenticated merge
//! - Concurrent resolves of the same key pair
//! - Irreconcilable account links
//! - Vote and participation migration after a merge
//! - Writes made with an identity retired by a concurrent merge

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use quorum_core::config::Config;
use quorum_core::error::ErrorCode;
use quorum_core::events::{EventStore, QuestionId};
use quorum_core::identity::{
    AccountId, CanonicalIdentity, IdentityStore, MergeOutcome, Reconciler, Reconciliation, Resolution,
};
use quorum_core::service::QaService;
use quorum_core::store::MemoryStore;

// ============================================================================
// Test Utilities
// ============================================================================

const TIMEOUT: Duration = Duration::from_secs(5);

fn reconciler(store: &Arc<MemoryStore>) -> Reconciler {
    Reconciler::new(store.clone(), store.clone(), TIMEOUT)
}

async fn resolve(reconciler: &Reconciler, device: &str, session: &str, account: Option<&str>) -> Resolution {
    let account = account.map(AccountId::from);
    reconciler
        .resolve(&device.into(), &session.into(), account.as_ref())
        .await
        .unwrap()
}

async fn participant(service: &QaService, device: &str, session: &str, account: Option<&str>) -> CanonicalIdentity {
    let account = account.map(AccountId::from);
    service
        .resolve(&device.into(), &session.into(), account.as_ref())
        .await
        .unwrap()
        .identity
}

// ============================================================================
// Anonymous Identities
// ============================================================================

#[tokio::test]
async fn test_first_resolve_creates_identity() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);

    let first = resolve(&reconciler, "d1", "s1", None).await;
    assert_eq!(
        first.decision,
        Reconciliation::CreateNew {
            identity: first.identity.id
        }
    );
    assert!(!first.identity.is_authenticated());
    assert_eq!(store.identity_count(), 1);
}

#[tokio::test]
async fn test_repeated_resolve_is_noop() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);

    let first = resolve(&reconciler, "d1", "s1", None).await;
    let second = resolve(&reconciler, "d1", "s1", None).await;

    assert_eq!(second.identity, first.identity);
    assert_eq!(second.decision, Reconciliation::NoOp);
    assert_eq!(store.identity_count(), 1);
}

#[tokio::test]
async fn test_new_session_attaches_to_device_owner() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);

    let first = resolve(&reconciler, "d1", "s1", None).await;
    let second = resolve(&reconciler, "d1", "s2", None).await;

    assert_eq!(second.identity.id, first.identity.id);
    assert_eq!(
        second.decision,
        Reconciliation::AttachKey {
            identity: first.identity.id
        }
    );

    let identity = store.get(first.identity.id).await.unwrap().unwrap();
    assert!(identity.owns_session(&"s1".into()));
    assert!(identity.owns_session(&"s2".into()));
}

#[tokio::test]
async fn test_session_owner_wins_over_new_device() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);

    let first = resolve(&reconciler, "d1", "s1", None).await;
    let second = resolve(&reconciler, "d2", "s1", None).await;

    assert_eq!(second.identity.id, first.identity.id);
    let found = store.find_by_device(&"d2".into()).await.unwrap().unwrap();
    assert_eq!(found.id, first.identity.id);
}

// ============================================================================
// Accounts & Merging
// ============================================================================

#[tokio::test]
async fn test_account_links_to_working_identity() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);

    let anonymous = resolve(&reconciler, "d1", "s1", None).await;
    let linked = resolve(&reconciler, "d1", "s1", Some("u1")).await;

    assert_eq!(linked.identity.id, anonymous.identity.id);
    assert_eq!(linked.identity.account, Some(AccountId::from("u1")));
    assert!(matches!(linked.decision, Reconciliation::LinkAccount { .. }));

    let again = resolve(&reconciler, "d1", "s1", Some("u1")).await;
    assert_eq!(again.decision, Reconciliation::NoOp);
}

#[tokio::test]
async fn test_anonymous_identity_merges_into_account_owner() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);

    let a = resolve(&reconciler, "d1", "s1", None).await.identity;
    let b = resolve(&reconciler, "d2", "s2", None).await.identity;
    resolve(&reconciler, "d2", "s2", Some("u1")).await;

    let merged = resolve(&reconciler, "d1", "s3", Some("u1")).await;
    assert_eq!(merged.identity.id, b.id);
    assert_eq!(
        merged.decision,
        Reconciliation::Merge {
            survivor: b.id,
            loser: a.id
        }
    );

    // A's old session now belongs to B, with or without the account.
    let later = resolve(&reconciler, "d1", "s1", None).await;
    assert_eq!(later.identity.id, b.id);
    assert_eq!(later.identity.account, Some(AccountId::from("u1")));

    let retired = store.get(a.id).await.unwrap().unwrap();
    assert_eq!(retired.id, b.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_converge() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Arc::new(reconciler(&store));

    let handles = (0..32).map(|_| {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            reconciler
                .resolve(&"d1".into(), &"s1".into(), None)
                .await
                .unwrap()
                .identity
                .id
        })
    });

    let mut ids: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.identity_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_account_resolves_converge() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Arc::new(reconciler(&store));

    let mut handles = Vec::new();
    for i in 0..16 {
        let reconciler = reconciler.clone();
        handles.push(tokio::spawn(async move {
            let device = format!("d{}", i);
            let session = format!("s{}", i);
            reconciler
                .resolve(&device.into(), &session.into(), Some(&AccountId::from("u1")))
                .await
                .unwrap()
                .identity
                .id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }

    let owner = store.find_by_account(&"u1".into()).await.unwrap().unwrap();
    // Early callers may have seen a survivor that was merged again afterwards.
    for id in ids {
        assert_eq!(store.get(id).await.unwrap().unwrap().id, owner.id);
    }
    for i in 0..16 {
        let device = format!("d{}", i);
        let found = store.find_by_device(&device.into()).await.unwrap().unwrap();
        assert_eq!(found.id, owner.id);
    }
}

#[tokio::test]
async fn test_second_account_on_linked_identity_conflicts() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);

    resolve(&reconciler, "d1", "s1", Some("u1")).await;
    let err = reconciler
        .resolve(&"d1".into(), &"s1".into(), Some(&AccountId::from("u2")))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::IdentityConflict);
    assert_eq!(err.http_status().as_u16(), 409);
}

#[tokio::test]
async fn test_merging_two_accounts_conflicts() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);

    let a = resolve(&reconciler, "d1", "s1", Some("u1")).await.identity;
    let b = resolve(&reconciler, "d2", "s2", Some("u2")).await.identity;

    let err = reconciler
        .resolve(&"d1".into(), &"s9".into(), Some(&AccountId::from("u2")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IdentityConflict);

    // Neither identity was retired.
    assert_eq!(store.get(a.id).await.unwrap().unwrap().id, a.id);
    assert_eq!(store.get(b.id).await.unwrap().unwrap().id, b.id);
}

// ============================================================================
// Vote Migration
// ============================================================================

#[tokio::test]
async fn test_merge_migrates_votes_without_duplicates() {
    let service = QaService::in_memory(&Config::default());

    let a = participant(&service, "d1", "s1", None).await;
    let b = participant(&service, "d2", "s2", Some("u1")).await;

    let event = service.create_event("Town hall", None).await.unwrap();
    let event = service.add_question(event.id, "Shared?", &a).await.unwrap();
    let shared = event.questions[0].id;
    let event = service.add_question(event.id, "Only A?", &b).await.unwrap();
    let only_a = event.questions.iter().find(|q| q.text == "Only A?").unwrap().id;

    service.toggle_vote(event.id, shared, &a).await.unwrap();
    service.toggle_vote(event.id, shared, &b).await.unwrap();
    service.toggle_vote(event.id, only_a, &a).await.unwrap();

    let merged = participant(&service, "d1", "s3", Some("u1")).await;
    assert_eq!(merged.id, b.id);

    let event = service.get_event(event.id).await.unwrap();
    let shared_q = event.question(shared).unwrap();
    assert_eq!(shared_q.votes(), 1);
    assert!(shared_q.has_voted(b.id));
    assert!(!shared_q.has_voted(a.id));
    assert!(event.question(only_a).unwrap().has_voted(b.id));
    assert_eq!(event.participants.len(), 1);
    assert_eq!(event.question(shared).unwrap().author, Some(b.id));

    // Toggling again as the merged identity retracts the migrated vote.
    let event = service.toggle_vote(event.id, only_a, &merged).await.unwrap();
    assert_eq!(event.question(only_a).unwrap().votes(), 0);
}

#[tokio::test]
async fn test_pending_migration_finishes_on_next_resolve() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);
    let service = QaService::new(store.clone(), store.clone(), &Config::default());

    let a = resolve(&reconciler, "d1", "s1", None).await.identity;
    let b = resolve(&reconciler, "d2", "s2", None).await.identity;

    let event = service.create_event("Retro", None).await.unwrap();
    let event = service.add_question(event.id, "What went well?", &b).await.unwrap();
    let question = event.questions[0].id;
    service.toggle_vote(event.id, question, &a).await.unwrap();

    // A merge that stopped before rewriting memberships.
    let outcome = store.merge(b.id, a.id).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    assert_eq!(store.pending_migrations(b.id).await.unwrap(), vec![a.id]);

    let event_state = store.get_event(event.id).await.unwrap().unwrap();
    assert!(event_state.question(question).unwrap().has_voted(a.id));

    let resolved = resolve(&reconciler, "d1", "s1", None).await;
    assert_eq!(resolved.identity.id, b.id);
    assert!(store.pending_migrations(b.id).await.unwrap().is_empty());

    let event_state = store.get_event(event.id).await.unwrap().unwrap();
    let q = event_state.question(question).unwrap();
    assert!(q.has_voted(b.id));
    assert!(!q.has_voted(a.id));
}

#[tokio::test]
async fn test_stale_identity_writes_land_on_survivor() {
    let service = QaService::in_memory(&Config::default());

    let a = participant(&service, "d1", "s1", None).await;
    let b = participant(&service, "d2", "s2", Some("u1")).await;
    let event = service.create_event("Launch review", None).await.unwrap();
    let event = service.add_question(event.id, "Ship date?", &b).await.unwrap();
    let question = event.questions[0].id;

    // A request that resolved `a` before the login below merged it away.
    let merged = participant(&service, "d1", "s3", Some("u1")).await;
    assert_eq!(merged.id, b.id);

    let event = service.toggle_vote(event.id, question, &a).await.unwrap();
    let q = event.question(question).unwrap();
    assert_eq!(q.votes(), 1);
    assert!(q.has_voted(b.id));
    assert!(!q.has_voted(a.id));
    assert_eq!(event.participants.iter().copied().collect::<Vec<_>>(), vec![b.id]);

    let event = service.add_question(event.id, "Late one?", &a).await.unwrap();
    let late = event.questions.iter().find(|q| q.text == "Late one?").unwrap();
    assert_eq!(late.author, Some(b.id));
    service.join_event(event.id, &a).await.unwrap();
    assert_eq!(service.get_event(event.id).await.unwrap().participants.len(), 1);

    // Another resolve has nothing left to repair.
    participant(&service, "d1", "s1", None).await;
    let event = service.get_event(event.id).await.unwrap();
    assert_eq!(event.question(question).unwrap().votes(), 1);

    // Both handles name the same person, so the survivor's toggle retracts that vote.
    let event = service.toggle_vote(event.id, question, &merged).await.unwrap();
    assert_eq!(event.question(question).unwrap().votes(), 0);
}

#[tokio::test]
async fn test_failed_toggle_leaves_no_trace() {
    let service = QaService::in_memory(&Config::default());
    let voter = participant(&service, "d1", "s1", None).await;
    let host = participant(&service, "d2", "s2", None).await;

    let event = service.create_event("Quiet room", None).await.unwrap();
    let err = service
        .toggle_vote(event.id, QuestionId::new(), &voter)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::QuestionNotFound);

    let event = service.add_question(event.id, "Anyone?", &host).await.unwrap();
    let err = service
        .toggle_vote(event.id, QuestionId::new(), &voter)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::QuestionNotFound);

    let event = service.get_event(event.id).await.unwrap();
    assert_eq!(event.participants.iter().copied().collect::<Vec<_>>(), vec![host.id]);
    assert_eq!(event.questions[0].votes(), 0);
}

#[tokio::test]
async fn test_interrupted_migration_leaves_events_ranked() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);
    let service = QaService::new(store.clone(), store.clone(), &Config::default());

    let a = resolve(&reconciler, "d1", "s1", None).await.identity;
    let b = resolve(&reconciler, "d2", "s2", None).await.identity;
    let c = resolve(&reconciler, "d3", "s3", None).await.identity;
    let d = resolve(&reconciler, "d4", "s4", None).await.identity;

    let event = service.create_event("Planning", None).await.unwrap();
    service.add_question(event.id, "Q1", &c).await.unwrap();
    let event = service.add_question(event.id, "Q2", &c).await.unwrap();
    let q1 = event.questions[0].id;
    let q2 = event.questions[1].id;

    for voter in [&a, &b] {
        service.toggle_vote(event.id, q1, voter).await.unwrap();
    }
    for voter in [&c, &d] {
        service.toggle_vote(event.id, q2, voter).await.unwrap();
    }
    let before = service.get_event(event.id).await.unwrap();
    assert_eq!(before.questions[0].id, q1);

    // Both merge steps ran, then the request was dropped before the bookkeeping.
    store.merge(b.id, a.id).await.unwrap();
    let touched = store.reassign_member(a.id, b.id).await.unwrap();
    assert_eq!(touched, vec![event.id]);

    let after = store.get_event(event.id).await.unwrap().unwrap();
    assert!(after.is_ranked());
    assert_eq!(after.questions[0].id, q2);
    assert_eq!(after.question(q1).unwrap().votes(), 1);

    let resolved = resolve(&reconciler, "d1", "s1", None).await;
    assert_eq!(resolved.identity.id, b.id);
    assert!(store.pending_migrations(b.id).await.unwrap().is_empty());
    assert!(store.get_event(event.id).await.unwrap().unwrap().is_ranked());
}

#[tokio::test]
async fn test_converged_resolve_skips_last_seen_write() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);

    let first = resolve(&reconciler, "d1", "s1", None).await;
    let seen = store.get(first.identity.id).await.unwrap().unwrap().last_seen_at;

    let again = resolve(&reconciler, "d1", "s1", None).await;
    assert_eq!(again.decision, Reconciliation::NoOp);
    let unchanged = store.get(first.identity.id).await.unwrap().unwrap().last_seen_at;
    assert_eq!(seen, unchanged);
}
