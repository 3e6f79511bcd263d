//! Match service facade
//!
//! Wires the supplier, registry, coordinator, bot simulator and queue together
//! and exposes the operations the AMQP handler and the HTTP routes call.

use crate::amqp::publisher::EventPublisher;
use crate::bot::{BotAnswerSimulator, BotProvider, NamedBotProvider};
use crate::config::AppConfig;
use crate::error::{MatchmakingError, Result};
use crate::matchmaking::{EnqueueOutcome, MatchmakingQueue, QueueConfig, QueueCounters};
use crate::metrics::MetricsCollector;
use crate::questions::{
    CacheStats, LocalQuestionBank, QuestionCache, QuestionSupplier, SourceStats, SupplierConfig,
};
use crate::room::{MatchRegistry, RegistryStats, RoomConfig, RoomCoordinator, SubmitResult};
use crate::scheduler::{Clock, Scheduler, SystemClock, TokioScheduler};
use crate::session::{GameSession, SessionRegistry, SoloAnswer, SoloSession, SOLO_QUESTION_COUNT};
use crate::store::{
    InMemoryMatchLedger, InMemoryQuestionHistory, MatchLedger, QuestionHistoryStore,
};
use crate::types::{Bet, Category, Difficulty, QueueStats, RoomId, RoomSnapshot, RoomStatus};
use crate::utils::{shared_rng, SharedRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collaborators injected into the service
#[derive(Clone)]
pub struct EnginePorts {
    pub scheduler: Arc<dyn Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub publisher: Arc<dyn EventPublisher>,
    pub history: Arc<dyn QuestionHistoryStore>,
    pub ledger: Arc<dyn MatchLedger>,
    pub rng: SharedRng,
    pub metrics: Option<Arc<MetricsCollector>>,
}

impl EnginePorts {
    /// Tokio timers, the wall clock and in-memory stores
    pub fn production(
        publisher: Arc<dyn EventPublisher>,
        rng_seed: Option<u64>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            scheduler: Arc::new(TokioScheduler),
            clock: Arc::new(SystemClock),
            publisher,
            history: Arc::new(InMemoryQuestionHistory::new()),
            ledger: Arc::new(InMemoryMatchLedger::new()),
            rng: shared_rng(rng_seed),
            metrics,
        }
    }
}

/// Point-in-time view of every component's counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub queue: QueueStats,
    pub queue_counters: QueueCounters,
    pub rooms: RegistryStats,
    pub sources: Vec<SourceStats>,
    pub cache: CacheStats,
    pub sessions: usize,
}

pub struct MatchService {
    queue: Arc<MatchmakingQueue>,
    coordinator: Arc<RoomCoordinator>,
    registry: Arc<MatchRegistry>,
    supplier: Arc<QuestionSupplier>,
    sessions: Arc<SessionRegistry>,
    history: Arc<dyn QuestionHistoryStore>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<MetricsCollector>>,
    finished_room_retention: Duration,
}

impl MatchService {
    /// Assemble the engine around an already-built question supplier
    pub fn new(config: &AppConfig, supplier: Arc<QuestionSupplier>, ports: EnginePorts) -> Self {
        let registry = Arc::new(MatchRegistry::new(
            supplier.clone(),
            ports.history.clone(),
            ports.ledger.clone(),
            ports.clock.clone(),
            RoomConfig::from(&config.room),
        ));

        let bot = Arc::new(BotAnswerSimulator::new(
            &config.bot,
            ports.rng.clone(),
            ports.scheduler.clone(),
        ));

        let coordinator = RoomCoordinator::new(
            registry.clone(),
            bot,
            ports.scheduler.clone(),
            ports.clock.clone(),
            ports.publisher.clone(),
            ports.history.clone(),
            ports.ledger.clone(),
            ports.metrics.clone(),
        );

        let bots: Arc<dyn BotProvider> = Arc::new(NamedBotProvider::new(ports.rng.clone()));
        let sessions = Arc::new(SessionRegistry::new());

        let queue = MatchmakingQueue::new(
            coordinator.clone(),
            bots,
            sessions.clone(),
            ports.scheduler.clone(),
            ports.clock.clone(),
            ports.publisher.clone(),
            ports.rng.clone(),
            QueueConfig::from(&config.matchmaking),
            ports.metrics.clone(),
        );

        Self {
            queue,
            coordinator,
            registry,
            supplier,
            sessions,
            history: ports.history,
            clock: ports.clock,
            metrics: ports.metrics,
            finished_room_retention: config.finished_room_retention(),
        }
    }

    /// Build the supplier from configuration, then the engine
    pub fn from_config(config: &AppConfig, ports: EnginePorts) -> Result<Self> {
        let mut supplier =
            QuestionSupplier::from_settings(&config.questions, ports.rng.clone(), ports.clock.clone())?;
        if let Some(metrics) = &ports.metrics {
            supplier = supplier.with_metrics(metrics.clone());
        }
        Ok(Self::new(config, Arc::new(supplier), ports))
    }

    /// Engine that only draws from the embedded local bank
    pub fn with_local_bank(config: &AppConfig, ports: EnginePorts) -> Result<Self> {
        let local = Arc::new(LocalQuestionBank::embedded(ports.rng.clone())?);
        let cache = QuestionCache::new(
            Duration::from_secs(config.questions.cache_ttl_seconds),
            ports.clock.clone(),
        );
        let mut supplier = QuestionSupplier::new(
            Vec::new(),
            local,
            cache,
            SupplierConfig {
                fetch_batch_size: config.questions.fetch_batch_size,
                max_attempts: config.questions.max_attempts,
            },
            ports.rng.clone(),
        );
        if let Some(metrics) = &ports.metrics {
            supplier = supplier.with_metrics(metrics.clone());
        }
        Ok(Self::new(config, Arc::new(supplier), ports))
    }

    /// Ask for an opponent at the given stake
    pub async fn enqueue(
        &self,
        player_id: &str,
        display_name: &str,
        amount: u64,
        category: Category,
        difficulty: Difficulty,
    ) -> Result<EnqueueOutcome> {
        self.ensure_free(player_id).await?;

        let bet = Bet::new(amount, category, difficulty);
        let request = self.queue.request(player_id, display_name, bet);
        self.queue.enqueue(request).await
    }

    pub fn cancel(&self, player_id: &str) -> Result<bool> {
        self.queue.cancel(player_id)
    }

    pub async fn submit_answer(
        &self,
        room_id: RoomId,
        player_id: &str,
        answer_index: usize,
    ) -> Result<SubmitResult> {
        let result = self
            .coordinator
            .submit_answer(room_id, player_id, answer_index)
            .await?;
        if let SubmitResult::Ignored { reason } = &result {
            debug!(
                "Answer from {} in room {} ignored: {}",
                player_id, room_id, reason
            );
        }
        Ok(result)
    }

    pub async fn room_snapshot(&self, room_id: RoomId) -> Option<RoomSnapshot> {
        self.registry.snapshot(room_id).await
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.queue_stats()
    }

    /// Start a solo practice run of up to ten unseen questions
    pub async fn start_solo(
        &self,
        player_id: &str,
        category: Category,
        difficulty: Difficulty,
    ) -> Result<SoloSession> {
        if player_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "player id is empty".to_string(),
            }
            .into());
        }
        self.ensure_free(player_id).await?;

        let exclude = match self.history.answered_question_ids(player_id).await {
            Ok(seen) => seen,
            Err(e) => {
                warn!("Could not read history for {}: {}", player_id, e);
                HashSet::new()
            }
        };

        let questions = self
            .supplier
            .next_batch(category, difficulty, SOLO_QUESTION_COUNT, &exclude)
            .await?;
        let session = SoloSession::new(
            player_id.to_string(),
            category,
            difficulty,
            questions,
            self.clock.now(),
        )?;
        self.sessions.start_solo(session.clone())?;

        info!(
            "Solo session started for {} on {}/{} with {} questions",
            player_id, category, difficulty, session.total_questions
        );
        Ok(session)
    }

    /// Answer the current solo question; a finished run is recorded and closed
    pub async fn answer_solo(&self, player_id: &str, answer_index: usize) -> Result<SoloAnswer> {
        let (answer, finished) = self.sessions.answer_solo(player_id, answer_index)?;

        if let Some(session) = finished {
            if let Err(e) = self
                .history
                .record_answered_questions(player_id, &session.question_ids())
                .await
            {
                warn!("Could not record solo history for {}: {}", player_id, e);
            }
            self.sessions.end(player_id);
            info!(
                "Solo session finished for {}: {}/{} ({})",
                player_id,
                session.score,
                session.total_questions,
                if answer.passed { "passed" } else { "failed" }
            );
        }

        Ok(answer)
    }

    pub fn session_for(&self, player_id: &str) -> Option<GameSession> {
        self.sessions.get(player_id)
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            queue: self.queue.queue_stats(),
            queue_counters: self.queue.counters(),
            rooms: self.registry.stats().await,
            sources: self.supplier.source_stats(),
            cache: self.supplier.cache_stats(),
            sessions: self.sessions.len(),
        }
    }

    /// Evict finished rooms past retention and release their sessions
    pub async fn cleanup_finished_rooms(&self) -> usize {
        let before: HashSet<RoomId> = self.registry.room_ids().into_iter().collect();
        let evicted = self
            .registry
            .cleanup_finished(self.finished_room_retention)
            .await;

        if evicted > 0 {
            let remaining: HashSet<RoomId> = self.registry.room_ids().into_iter().collect();
            for room_id in before.difference(&remaining) {
                self.sessions.release_room(*room_id);
            }
            let purged = self.supplier.purge_cache();
            debug!("Purged {} expired question cache entries", purged);
        }

        self.refresh_gauges().await;
        evicted
    }

    /// Push room and queue gauges to prometheus
    pub async fn refresh_gauges(&self) {
        if let Some(metrics) = &self.metrics {
            let rooms = self.registry.stats().await;
            metrics.set_active_rooms(rooms.active_rooms);
            metrics.set_queue_depth(self.queue.queue_len());
        }
    }

    pub fn queue(&self) -> &Arc<MatchmakingQueue> {
        &self.queue
    }

    pub fn coordinator(&self) -> &Arc<RoomCoordinator> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<MatchRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// A player may only be in one place: the queue, a live room, or solo practice
    async fn ensure_free(&self, player_id: &str) -> Result<()> {
        if self.queue.is_queued(player_id) {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: format!("{} is already waiting for a match", player_id),
            }
            .into());
        }
        if self.queue.is_pairing(player_id) {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: format!("{} is already being paired", player_id),
            }
            .into());
        }

        match self.sessions.get(player_id) {
            Some(GameSession::Solo(_)) => Err(MatchmakingError::InvalidMatchRequest {
                reason: format!("{} is in a solo session", player_id),
            }
            .into()),
            Some(GameSession::Multiplayer { room_id }) => {
                match self.registry.snapshot(room_id).await {
                    Some(room) if room.status != RoomStatus::Finished => {
                        Err(MatchmakingError::InvalidMatchRequest {
                            reason: format!("{} is still playing in room {}", player_id, room_id),
                        }
                        .into())
                    }
                    _ => {
                        self.sessions.end(player_id);
                        Ok(())
                    }
                }
            }
            None => Ok(()),
        }
    }
}
