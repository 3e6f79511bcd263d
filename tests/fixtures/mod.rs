//! Test fixtures for driving a complete engine through virtual time
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use trivia_duel::amqp::MockEventPublisher;
use trivia_duel::config::AppConfig;
use trivia_duel::error::{MatchmakingError, Result};
use trivia_duel::questions::{
    LocalQuestionBank, QuestionCache, QuestionSource, QuestionSupplier, SupplierConfig,
};
use trivia_duel::room::SubmitResult;
use trivia_duel::scheduler::{Clock, ManualScheduler, Scheduler};
use trivia_duel::service::{EnginePorts, MatchService};
use trivia_duel::store::{InMemoryMatchLedger, InMemoryQuestionHistory};
use trivia_duel::types::{Category, Difficulty, Question, RoomId, RoomSnapshot};
use trivia_duel::utils::shared_rng;
use trivia_duel::EnqueueOutcome;

/// Every fixture question has the right answer at this index
pub const RIGHT: usize = 0;
/// A wrong but valid option
pub const WRONG: usize = 1;

pub fn question(id: &str, category: Category, difficulty: Difficulty) -> Question {
    Question {
        id: id.to_string(),
        text: format!("Fixture question {}?", id),
        options: vec![
            "right".to_string(),
            "wrong".to_string(),
            "still wrong".to_string(),
            "nope".to_string(),
        ],
        correct_answer_index: RIGHT,
        category,
        difficulty,
    }
}

/// `count` questions named `<prefix>-<n>`
pub fn questions(prefix: &str, category: Category, difficulty: Difficulty, count: usize) -> Vec<Question> {
    (0..count)
        .map(|i| question(&format!("{}-{}", prefix, i), category, difficulty))
        .collect()
}

/// Default bank: 40 math/easy questions plus a handful elsewhere
pub fn default_bank() -> Vec<Question> {
    let mut bank = questions("local-math", Category::Math, Difficulty::Easy, 40);
    bank.extend(questions("local-sports", Category::Sports, Difficulty::Hard, 12));
    bank
}

/// Timings pinned so every delay is exact under the manual scheduler
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.service.rng_seed = Some(42);
    config.matchmaking.bot_fallback_min_ms = 5_000;
    config.matchmaking.bot_fallback_max_ms = 5_000;
    config.bot.accuracy = 1.0;
    config.bot.min_answer_delay_ms = 1_000;
    config.bot.max_answer_delay_ms = 1_000;
    config.room.settle_delay_ms = 2_000;
    config.room.question_time_limit_seconds = 10;
    config.questions.sources = Vec::new();
    config
}

/// External source that never answers
pub struct FailingSource {
    name: String,
    calls: AtomicUsize,
}

impl FailingSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionSource for FailingSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn fetch(
        &self,
        _category: Category,
        _difficulty: Difficulty,
        _count: usize,
    ) -> Result<Vec<Question>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(MatchmakingError::ExternalSourceUnavailable {
            source_name: self.name.clone(),
            message: "503 Service Unavailable".to_string(),
        }
        .into())
    }
}

/// External source that fails, and can be told to hang on its next fetch
/// until released
pub struct StallingSource {
    name: String,
    calls: AtomicUsize,
    stall_next: AtomicBool,
    stalled: Notify,
    released: Notify,
}

impl StallingSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            stall_next: AtomicBool::new(false),
            stalled: Notify::new(),
            released: Notify::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stall_next_fetch(&self) {
        self.stall_next.store(true, Ordering::SeqCst);
    }

    /// Resolves once a fetch is hanging
    pub async fn wait_until_stalled(&self) {
        self.stalled.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl QuestionSource for StallingSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn fetch(
        &self,
        _category: Category,
        _difficulty: Difficulty,
        _count: usize,
    ) -> Result<Vec<Question>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_next.swap(false, Ordering::SeqCst) {
            self.stalled.notify_one();
            self.released.notified().await;
        }
        Err(MatchmakingError::ExternalSourceUnavailable {
            source_name: self.name.clone(),
            message: "gateway timeout".to_string(),
        }
        .into())
    }
}

/// A fully wired engine with observable ports
pub struct TestHarness {
    pub engine: MatchService,
    pub scheduler: Arc<ManualScheduler>,
    pub publisher: Arc<MockEventPublisher>,
    pub history: Arc<InMemoryQuestionHistory>,
    pub ledger: Arc<InMemoryMatchLedger>,
    pub config: AppConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(test_config(), Vec::new(), default_bank())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self::build(config, Vec::new(), default_bank())
    }

    pub fn build(
        config: AppConfig,
        sources: Vec<Arc<dyn QuestionSource>>,
        bank: Vec<Question>,
    ) -> Self {
        let scheduler = Arc::new(ManualScheduler::new());
        let publisher = Arc::new(MockEventPublisher::new());
        let history = Arc::new(InMemoryQuestionHistory::new());
        let ledger = Arc::new(InMemoryMatchLedger::new());
        let rng = shared_rng(config.service.rng_seed);
        let clock: Arc<dyn Clock> = scheduler.clone();
        let timers: Arc<dyn Scheduler> = scheduler.clone();

        let supplier = QuestionSupplier::new(
            sources,
            Arc::new(LocalQuestionBank::from_questions(bank, rng.clone())),
            QuestionCache::new(Duration::from_secs(600), clock.clone()),
            SupplierConfig::default(),
            rng.clone(),
        );

        let ports = EnginePorts {
            scheduler: timers,
            clock,
            publisher: publisher.clone(),
            history: history.clone(),
            ledger: ledger.clone(),
            rng,
            metrics: None,
        };
        let engine = MatchService::new(&config, Arc::new(supplier), ports);

        Self {
            engine,
            scheduler,
            publisher,
            history,
            ledger,
            config,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.config.room.settle_delay_ms)
    }

    pub fn question_time_limit(&self) -> Duration {
        Duration::from_secs(self.config.room.question_time_limit_seconds)
    }

    pub fn bot_fallback(&self) -> Duration {
        Duration::from_millis(self.config.matchmaking.bot_fallback_max_ms)
    }

    pub fn bot_delay(&self) -> Duration {
        Duration::from_millis(self.config.bot.max_answer_delay_ms)
    }

    pub async fn enqueue(&self, player_id: &str, amount: u64) -> Result<EnqueueOutcome> {
        self.engine
            .enqueue(player_id, player_id, amount, Category::Math, Difficulty::Easy)
            .await
    }

    /// Pair two humans on the default math/easy bet and return the room
    pub async fn paired_room(&self, first: &str, second: &str) -> RoomSnapshot {
        self.enqueue(first, 10).await.unwrap();
        match self.enqueue(second, 10).await.unwrap() {
            EnqueueOutcome::Matched(snapshot) => snapshot,
            other => panic!("expected an immediate pairing, got {:?}", other),
        }
    }

    pub async fn answer(&self, room_id: RoomId, player_id: &str, index: usize) -> SubmitResult {
        self.engine
            .submit_answer(room_id, player_id, index)
            .await
            .unwrap()
    }

    /// Both humans answer the current question, then the settle delay elapses
    pub async fn play_question(
        &self,
        room_id: RoomId,
        first: (&str, bool),
        second: (&str, bool),
    ) {
        for (player_id, correct) in [first, second] {
            let index = if correct { RIGHT } else { WRONG };
            let result = self.answer(room_id, player_id, index).await;
            assert!(result.is_recorded(), "answer from {} not recorded: {:?}", player_id, result);
        }
        self.scheduler.advance(self.settle_delay()).await;
    }

    pub async fn snapshot(&self, room_id: RoomId) -> RoomSnapshot {
        self.engine
            .room_snapshot(room_id)
            .await
            .expect("room should be registered")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
