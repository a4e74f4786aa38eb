//! Integration tests for the vote and ranking engine.
//!
//! Tests cover:
//! - Ranking by descending vote count with stable ties
//! - Personalized projections
//! - Toggle semantics and concurrent toggles
//! - Ranking invariants under arbitrary vote sequences

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use proptest::prelude::*;
use quorum_core::config::Config;
use quorum_core::events::{project, rank_questions, Event, EventCode, EventId, Question, QuestionId};
use quorum_core::identity::{CanonicalIdentity, IdentityId};
use quorum_core::service::QaService;

// ============================================================================
// Test Utilities
// ============================================================================

fn service() -> QaService {
    QaService::in_memory(&Config::default())
}

async fn participant(service: &QaService, name: &str) -> CanonicalIdentity {
    service
        .resolve(&format!("{}-device", name).into(), &format!("{}-session", name).into(), None)
        .await
        .unwrap()
        .identity
}

async fn vote_n(service: &QaService, event: EventId, question: QuestionId, voters: &[CanonicalIdentity]) {
    for voter in voters {
        service.toggle_vote(event, question, voter).await.unwrap();
    }
}

fn order(event: &Event) -> Vec<String> {
    event.questions.iter().map(|q| q.text.clone()).collect()
}

// ============================================================================
// Ranking
// ============================================================================

#[tokio::test]
async fn test_vote_reorders_questions() {
    let service = service();
    let author = participant(&service, "host").await;

    let mut voters = Vec::new();
    for i in 0..6 {
        voters.push(participant(&service, &format!("v{}", i)).await);
    }

    let event = service.create_event("Keynote", None).await.unwrap();
    let mut ids = Vec::new();
    for text in ["Q1", "Q2", "Q3"] {
        let event = service.add_question(event.id, text, &author).await.unwrap();
        ids.push(event.questions.iter().find(|q| q.text == text).unwrap().id);
    }

    vote_n(&service, event.id, ids[0], &voters[..3]).await;
    vote_n(&service, event.id, ids[1], &voters[..5]).await;
    vote_n(&service, event.id, ids[2], &voters[3..6]).await;

    let ranked = service.get_event(event.id).await.unwrap();
    assert_eq!(order(&ranked), vec!["Q2", "Q1", "Q3"]);

    let ranked = service.toggle_vote(event.id, ids[0], &voters[5]).await.unwrap();
    assert_eq!(order(&ranked), vec!["Q2", "Q1", "Q3"]);
    let counts: Vec<usize> = ranked.questions.iter().map(Question::votes).collect();
    assert_eq!(counts, vec![5, 4, 3]);
}

#[tokio::test]
async fn test_ties_keep_insertion_order() {
    let service = service();
    let author = participant(&service, "host").await;
    let voter = participant(&service, "voter").await;

    let event = service.create_event("Standup", None).await.unwrap();
    for text in ["first", "second", "third"] {
        service.add_question(event.id, text, &author).await.unwrap();
    }
    let ranked = service.get_event(event.id).await.unwrap();
    assert_eq!(order(&ranked), vec!["first", "second", "third"]);

    let third = ranked.questions[2].id;
    let ranked = service.toggle_vote(event.id, third, &voter).await.unwrap();
    assert_eq!(order(&ranked), vec!["third", "first", "second"]);
}

// ============================================================================
// Projection
// ============================================================================

#[tokio::test]
async fn test_projection_marks_viewer_votes() {
    let service = service();
    let i1 = participant(&service, "i1").await;
    let i2 = participant(&service, "i2").await;
    let i3 = participant(&service, "i3").await;

    let event = service.create_event("Panel", None).await.unwrap();
    let event = service.add_question(event.id, "Q", &i3).await.unwrap();
    let q = event.questions[0].id;
    service.toggle_vote(event.id, q, &i1).await.unwrap();
    let event = service.toggle_vote(event.id, q, &i2).await.unwrap();

    let for_i1 = project(&event, &i1);
    let for_i3 = project(&event, &i3);
    assert!(for_i1.questions[0].voted);
    assert!(!for_i3.questions[0].voted);
    assert_eq!(for_i1.questions[0].votes, 2);
    assert!(for_i3.questions[0].asked_by_viewer);

    let json = serde_json::to_value(&for_i1).unwrap();
    let rendered = json.to_string();
    assert!(json["questions"][0].get("voters").is_none());
    for id in [i1.id, i2.id, i3.id] {
        assert!(!rendered.contains(&id.to_string()));
    }
}

// ============================================================================
// Toggles
// ============================================================================

#[tokio::test]
async fn test_double_toggle_restores_state() {
    let service = service();
    let author = participant(&service, "host").await;
    let voter = participant(&service, "voter").await;

    let event = service.create_event("AMA", None).await.unwrap();
    let event = service.add_question(event.id, "Why?", &author).await.unwrap();
    let q = event.questions[0].id;

    let cast = service.toggle_vote(event.id, q, &voter).await.unwrap();
    assert!(cast.question(q).unwrap().has_voted(voter.id));
    assert_eq!(cast.question(q).unwrap().votes(), 1);

    let retracted = service.toggle_vote(event.id, q, &voter).await.unwrap();
    assert!(!retracted.question(q).unwrap().has_voted(voter.id));
    assert_eq!(retracted.question(q).unwrap().votes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_toggles_lose_no_votes() {
    let service = Arc::new(service());
    let author = participant(&service, "host").await;
    let event = service.create_event("Rush", None).await.unwrap();
    let event = service.add_question(event.id, "Hot take?", &author).await.unwrap();
    let q = event.questions[0].id;

    let mut voters = Vec::new();
    for i in 0..64 {
        voters.push(participant(&service, &format!("v{}", i)).await);
    }

    let handles = voters.iter().cloned().map(|voter| {
        let service = service.clone();
        let event_id = event.id;
        tokio::spawn(async move {
            service.toggle_vote(event_id, q, &voter).await.unwrap();
        })
    });
    for result in join_all(handles).await {
        result.unwrap();
    }

    let event = service.get_event(event.id).await.unwrap();
    let question = event.question(q).unwrap();
    assert_eq!(question.votes(), 64);
    for voter in &voters {
        assert!(question.has_voted(voter.id));
    }
    assert_eq!(event.participants.len(), 65);
}

// ============================================================================
// Property Tests
// ============================================================================

fn questions_with_votes(counts: &[usize]) -> Vec<Question> {
    counts
        .iter()
        .enumerate()
        .map(|(i, count)| {
            let mut question = Question::new(&format!("q{}", i), None).unwrap();
            question.voters = (0..*count).map(|_| IdentityId::new()).collect::<BTreeSet<_>>();
            question
        })
        .collect()
}

proptest! {
    #[test]
    fn test_ranking_is_sorted_and_stable(counts in prop::collection::vec(0usize..6, 0..20)) {
        let mut questions = questions_with_votes(&counts);
        let before: Vec<QuestionId> = questions.iter().map(|q| q.id).collect();
        rank_questions(&mut questions);

        let event = Event {
            id: EventId::new(),
            title: "Props".to_string(),
            code: EventCode::from_trusted("props"),
            questions: questions.clone(),
            participants: BTreeSet::new(),
            created_at: chrono::Utc::now(),
        };
        prop_assert!(event.is_ranked());

        for pair in questions.windows(2) {
            prop_assert!(pair[0].votes() >= pair[1].votes());
            if pair[0].votes() == pair[1].votes() {
                let a = before.iter().position(|id| *id == pair[0].id);
                let b = before.iter().position(|id| *id == pair[1].id);
                prop_assert!(a < b);
            }
        }
        prop_assert_eq!(questions.len(), counts.len());
    }

    #[test]
    fn test_toggle_sequence_counts_match_voter_sets(toggles in prop::collection::vec((0usize..3, 0usize..4), 0..40)) {
        tokio_test::block_on(async {
            let service = service();
            let mut voters = Vec::new();
            for i in 0..4 {
                voters.push(participant(&service, &format!("p{}", i)).await);
            }
            let event = service.create_event("Props", None).await.unwrap();
            for text in ["a", "b", "c"] {
                service.add_question(event.id, text, &voters[0]).await.unwrap();
            }
            let ids: Vec<QuestionId> = service.get_event(event.id).await.unwrap().questions.iter().map(|q| q.id).collect();

            let mut expected = vec![BTreeSet::new(); 3];
            for (question, voter) in &toggles {
                service.toggle_vote(event.id, ids[*question], &voters[*voter]).await.unwrap();
                let set: &mut BTreeSet<IdentityId> = &mut expected[*question];
                if !set.remove(&voters[*voter].id) {
                    set.insert(voters[*voter].id);
                }
            }

            let event = service.get_event(event.id).await.unwrap();
            for (i, id) in ids.iter().enumerate() {
                let question = event.question(*id).unwrap();
                assert_eq!(question.voters, expected[i]);
                assert_eq!(question.votes(), expected[i].len());
            }
            assert!(event.is_ranked());
        });
    }
}
