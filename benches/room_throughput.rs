//! Performance benchmarks for pairing and room progression

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use trivia_duel::amqp::MockEventPublisher;
use trivia_duel::config::AppConfig;
use trivia_duel::questions::{LocalQuestionBank, QuestionCache, QuestionSupplier, SupplierConfig};
use trivia_duel::room::{MatchRoom, Progress, RoomConfig};
use trivia_duel::scheduler::{Clock, ManualScheduler, Scheduler};
use trivia_duel::service::{EnginePorts, MatchService};
use trivia_duel::store::{InMemoryMatchLedger, InMemoryQuestionHistory};
use trivia_duel::types::{Bet, Category, Difficulty, Player, Question};
use trivia_duel::utils::{current_timestamp, generate_match_id, generate_room_id, shared_rng};
use trivia_duel::EnqueueOutcome;

fn bench_questions(count: usize) -> Vec<Question> {
    (0..count)
        .map(|i| Question {
            id: format!("bench-{}", i),
            text: format!("Benchmark question number {}?", i),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer_index: i % 4,
            category: Category::Math,
            difficulty: Difficulty::Easy,
        })
        .collect()
}

fn create_bench_engine() -> (MatchService, Arc<ManualScheduler>) {
    let config = AppConfig::default();
    let scheduler = Arc::new(ManualScheduler::new());
    let clock: Arc<dyn Clock> = scheduler.clone();
    let timers: Arc<dyn Scheduler> = scheduler.clone();
    let rng = shared_rng(Some(1));

    let supplier = QuestionSupplier::new(
        Vec::new(),
        Arc::new(LocalQuestionBank::from_questions(
            bench_questions(200),
            rng.clone(),
        )),
        QuestionCache::new(Duration::from_secs(600), clock.clone()),
        SupplierConfig::default(),
        rng.clone(),
    );

    let ports = EnginePorts {
        scheduler: timers,
        clock,
        publisher: Arc::new(MockEventPublisher::new()),
        history: Arc::new(InMemoryQuestionHistory::new()),
        ledger: Arc::new(InMemoryMatchLedger::new()),
        rng,
        metrics: None,
    };
    (MatchService::new(&config, Arc::new(supplier), ports), scheduler)
}

fn bench_room_state_machine(c: &mut Criterion) {
    let questions = bench_questions(10);

    c.bench_function("room_main_round", |b| {
        b.iter(|| {
            let now = current_timestamp();
            let mut room = MatchRoom::new(
                generate_room_id(),
                generate_match_id(),
                vec![Player::human("p1", "One"), Player::human("p2", "Two")],
                Bet::new(10, Category::Math, Difficulty::Easy),
                questions.clone(),
                HashSet::new(),
                RoomConfig::default(),
                now,
            )
            .unwrap();

            loop {
                let correct = room.current_question().map(|q| q.correct_answer_index);
                let Some(correct) = correct else { break };
                room.submit_answer("p1", correct);
                room.submit_answer("p2", (correct + 1) % 4);
                room.begin_settling();
                if let Progress::Finished(outcome) = room.settle(now) {
                    black_box(outcome);
                    break;
                }
            }
        })
    });
}

fn bench_pairing(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("pair_two_requests", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (engine, _scheduler) = create_bench_engine();
                engine
                    .enqueue("p1", "One", 10, Category::Math, Difficulty::Easy)
                    .await
                    .unwrap();
                black_box(
                    engine
                        .enqueue("p2", "Two", 10, Category::Math, Difficulty::Easy)
                        .await
                        .unwrap(),
                )
            })
        })
    });
}

fn bench_full_match(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("full_match_through_engine", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (engine, scheduler) = create_bench_engine();
                engine
                    .enqueue("p1", "One", 10, Category::Math, Difficulty::Easy)
                    .await
                    .unwrap();
                let room = match engine
                    .enqueue("p2", "Two", 10, Category::Math, Difficulty::Easy)
                    .await
                    .unwrap()
                {
                    EnqueueOutcome::Matched(room) => room,
                    EnqueueOutcome::Queued { .. } => return,
                };

                for _ in 0..room.total_questions {
                    let _ = engine.submit_answer(room.room_id, "p1", 0).await;
                    let _ = engine.submit_answer(room.room_id, "p2", 1).await;
                    scheduler.advance(Duration::from_secs(2)).await;
                }
                black_box(engine.room_snapshot(room.room_id).await);
            });
        })
    });
}

fn bench_queue_depth(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("enqueue_100_incompatible", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (engine, _scheduler) = create_bench_engine();
                for i in 0..100u64 {
                    let _ = engine
                        .enqueue(
                            &format!("player_{}", i),
                            "Bench",
                            (i + 1) * 5,
                            Category::Math,
                            Difficulty::Easy,
                        )
                        .await;
                }
                black_box(engine.queue_stats())
            })
        })
    });
}

criterion_group!(
    benches,
    bench_room_state_machine,
    bench_pairing,
    bench_full_match,
    bench_queue_depth
);
criterion_main!(benches);
