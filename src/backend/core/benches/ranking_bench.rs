//! Benchmarks for ranking, projection and vote toggles.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quorum_core::config::Config;
use quorum_core::events::{project, rank_questions, Event, EventCode, PendingEvent, Question};
use quorum_core::identity::{CanonicalIdentity, IdentityId};
use quorum_core::service::QaService;

fn build_questions(n: usize) -> Vec<Question> {
    (0..n)
        .map(|i| {
            let mut q = Question::new(&format!("question-{i}"), None).unwrap();
            q.voters = (0..(i * 7919) % 50).map(|_| IdentityId::new()).collect();
            q
        })
        .collect()
}

fn build_event(n: usize) -> Event {
    let mut event = PendingEvent::new("bench")
        .unwrap()
        .with_code(EventCode::parse("bench").unwrap())
        .to_event()
        .unwrap();
    event.questions = build_questions(n);
    event
}

fn bench_rank_questions(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank_questions");
    for size in [10, 100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        let questions = build_questions(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &questions, |b, qs| {
            b.iter(|| {
                let mut qs = qs.clone();
                rank_questions(&mut qs);
                black_box(qs)
            });
        });
    }
    group.finish();
}

fn bench_project(c: &mut Criterion) {
    let mut group = c.benchmark_group("project");
    let viewer = CanonicalIdentity {
        id: IdentityId::new(),
        account: None,
    };
    for size in [10, 100, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        let event = build_event(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &event, |b, e| {
            b.iter(|| black_box(project(e, &viewer)));
        });
    }
    group.finish();
}

fn bench_toggle_vote(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = QaService::in_memory(&Config::default());
    let (event, question, voter) = rt.block_on(async {
        let voter = service
            .resolve(&"bench-device".into(), &"bench-session".into(), None)
            .await
            .unwrap()
            .identity;
        let event = service.create_event("bench", None).await.unwrap();
        let mut last = None;
        for i in 0..100 {
            let ev = service.add_question(event.id, &format!("q-{i}"), &voter).await.unwrap();
            last = ev.questions.last().map(|q| q.id);
        }
        (event.id, last.unwrap(), voter)
    });

    c.bench_function("toggle_vote_100_questions", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(service.toggle_vote(event, question, &voter).await.unwrap()) });
    });
}

criterion_group!(benches, bench_rank_questions, bench_project, bench_toggle_vote);
criterion_main!(benches);
