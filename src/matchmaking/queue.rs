//! Matchmaking queue
//!
//! Holds outstanding match requests and pairs compatible ones. A request
//! pairs with the first compatible request from another player, in insertion
//! order. A requester left waiting is paired with a synthesized bot once a
//! randomized fallback window elapses, so nobody waits indefinitely.

use crate::amqp::publisher::EventPublisher;
use crate::bot::provider::BotProvider;
use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::matchmaking::wait_stats::{OpponentKind, WaitEstimator};
use crate::metrics::MetricsCollector;
use crate::room::RoomCoordinator;
use crate::scheduler::{Clock, Scheduler, TimerHandle};
use crate::session::SessionRegistry;
use crate::types::{
    Bet, MatchRequest, MatchmakingFailed, Player, PlayerId, QueueStats, RoomFound, RoomSnapshot,
};
use crate::utils::SharedRng;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Queue behaviour
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub enable_bot_fallback: bool,
    pub bot_fallback_min: Duration,
    pub bot_fallback_max: Duration,
    pub bet_unit: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&MatchmakingSettings::default())
    }
}

impl From<&MatchmakingSettings> for QueueConfig {
    fn from(settings: &MatchmakingSettings) -> Self {
        Self {
            enable_bot_fallback: settings.enable_bot_fallback,
            bot_fallback_min: Duration::from_millis(settings.bot_fallback_min_ms),
            bot_fallback_max: Duration::from_millis(
                settings.bot_fallback_max_ms.max(settings.bot_fallback_min_ms),
            ),
            bet_unit: settings.bet_unit,
        }
    }
}

/// Result of an enqueue
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// Paired immediately with a waiting requester
    Matched(RoomSnapshot),
    /// Waiting for a compatible request or the bot fallback
    Queued { position: usize },
}

/// Queue counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueCounters {
    pub requests: u64,
    pub rejected: u64,
    pub human_pairings: u64,
    pub bot_pairings: u64,
    pub cancellations: u64,
    pub pairing_failures: u64,
}

#[derive(Default)]
struct QueueState {
    waiting: Vec<MatchRequest>,
    fallback_timers: HashMap<PlayerId, TimerHandle>,
    /// Taken off the queue, room not yet announced
    pairing: HashSet<PlayerId>,
}

pub struct MatchmakingQueue {
    me: Weak<MatchmakingQueue>,
    state: Mutex<QueueState>,
    coordinator: Arc<RoomCoordinator>,
    bots: Arc<dyn BotProvider>,
    sessions: Arc<SessionRegistry>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn EventPublisher>,
    rng: SharedRng,
    config: QueueConfig,
    waits: WaitEstimator,
    counters: RwLock<QueueCounters>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchmakingQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coordinator: Arc<RoomCoordinator>,
        bots: Arc<dyn BotProvider>,
        sessions: Arc<SessionRegistry>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn EventPublisher>,
        rng: SharedRng,
        config: QueueConfig,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Arc<Self> {
        let waits = WaitEstimator::new(config.bot_fallback_min, config.bot_fallback_max);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: Mutex::new(QueueState::default()),
            coordinator,
            bots,
            sessions,
            scheduler,
            clock,
            publisher,
            rng,
            config,
            waits,
            counters: RwLock::new(QueueCounters::default()),
            metrics,
        })
    }

    /// Build a request stamped with the queue's clock
    pub fn request(
        &self,
        player_id: impl Into<PlayerId>,
        display_name: impl Into<String>,
        bet: Bet,
    ) -> MatchRequest {
        MatchRequest {
            player_id: player_id.into(),
            display_name: display_name.into(),
            bet,
            submitted_at: self.clock.now(),
        }
    }

    /// Pair the request with a waiting compatible one, or hold it
    pub async fn enqueue(&self, mut request: MatchRequest) -> Result<EnqueueOutcome> {
        self.count(|c| c.requests += 1);
        if let Err(e) = self.validate(&request) {
            self.count(|c| c.rejected += 1);
            return Err(e);
        }
        request.bet = Bet::new(
            request.bet.amount,
            request.bet.category,
            request.bet.difficulty,
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_match_request(request.bet.category.as_str());
        }

        let opponent = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| MatchmakingError::lock_failed("queue"))?;

            if state.waiting.iter().any(|r| r.player_id == request.player_id) {
                self.count(|c| c.rejected += 1);
                return Err(MatchmakingError::InvalidMatchRequest {
                    reason: format!("{} is already waiting for a match", request.player_id),
                }
                .into());
            }
            if state.pairing.contains(&request.player_id) {
                self.count(|c| c.rejected += 1);
                return Err(MatchmakingError::InvalidMatchRequest {
                    reason: format!("{} is already being paired", request.player_id),
                }
                .into());
            }

            let position = state.waiting.iter().position(|waiting| {
                waiting.player_id != request.player_id
                    && waiting.bet.is_compatible_with(&request.bet)
            });

            match position {
                Some(index) => {
                    let opponent = state.waiting.remove(index);
                    if let Some(timer) = state.fallback_timers.remove(&opponent.player_id) {
                        timer.cancel();
                    }
                    state.pairing.insert(opponent.player_id.clone());
                    state.pairing.insert(request.player_id.clone());
                    Some(opponent)
                }
                None => {
                    let player_id = request.player_id.clone();
                    let submitted_at = request.submitted_at;
                    state.waiting.push(request.clone());
                    if let Some(timer) = self.arm_fallback(&player_id, submitted_at) {
                        state.fallback_timers.insert(player_id, timer);
                    }
                    None
                }
            }
        };
        self.publish_depth();

        let opponent = match opponent {
            Some(opponent) => opponent,
            None => {
                let position = self.queue_len();
                info!(
                    "Queued {} for a {} bet on {}/{} (position {})",
                    request.player_id,
                    request.bet.amount,
                    request.bet.category,
                    request.bet.difficulty,
                    position
                );
                return Ok(EnqueueOutcome::Queued { position });
            }
        };

        info!(
            "Pairing {} with waiting {} for a {} bet on {}/{}",
            request.player_id,
            opponent.player_id,
            request.bet.amount,
            request.bet.category,
            request.bet.difficulty
        );

        let waited = self.waited_since(opponent.submitted_at);
        let players = vec![Player::from_request(&opponent), Player::from_request(&request)];
        let opened = self.coordinator.open_room(players, request.bet.clone()).await;
        let outcome = match opened {
            Ok(snapshot) => {
                self.record_pairing(OpponentKind::Human, waited);
                self.announce(&snapshot).await;
                Ok(EnqueueOutcome::Matched(snapshot))
            }
            Err(e) => {
                self.report_failure(&[&opponent, &request], &e).await;
                Err(e)
            }
        };
        self.pairing_done(&[&opponent.player_id, &request.player_id]);
        outcome
    }

    /// Withdraw a waiting request. Returns false if the player was not waiting.
    pub fn cancel(&self, player_id: &str) -> Result<bool> {
        let removed = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| MatchmakingError::lock_failed("queue"))?;

            let before = state.waiting.len();
            state.waiting.retain(|r| r.player_id != player_id);
            if let Some(timer) = state.fallback_timers.remove(player_id) {
                timer.cancel();
            }
            state.waiting.len() != before
        };

        if removed {
            info!("Cancelled matchmaking for {}", player_id);
            self.count(|c| c.cancellations += 1);
            if let Some(metrics) = &self.metrics {
                metrics.record_cancellation();
            }
            self.publish_depth();
        } else {
            debug!("Cancel for {} ignored, not waiting", player_id);
        }
        Ok(removed)
    }

    pub fn queue_stats(&self) -> QueueStats {
        QueueStats {
            players_in_queue: self.queue_len(),
            estimated_wait_seconds: self.waits.estimate().as_secs_f64().round() as u64,
        }
    }

    pub fn is_queued(&self, player_id: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.waiting.iter().any(|r| r.player_id == player_id))
            .unwrap_or(false)
    }

    /// Whether the player's room is being opened right now
    pub fn is_pairing(&self, player_id: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.pairing.contains(player_id))
            .unwrap_or(false)
    }

    pub fn queue_len(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.waiting.len())
            .unwrap_or(0)
    }

    pub fn counters(&self) -> QueueCounters {
        self.counters
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn validate(&self, request: &MatchRequest) -> Result<()> {
        if request.player_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "player id is empty".to_string(),
            }
            .into());
        }
        request.bet.validate(self.config.bet_unit)
    }

    fn arm_fallback(&self, player_id: &str, submitted_at: DateTime<Utc>) -> Option<TimerHandle> {
        if !self.config.enable_bot_fallback {
            return None;
        }

        let delay = self.fallback_delay();
        let me = self.me.clone();
        let player_id = player_id.to_string();
        debug!("Bot fallback for {} armed in {:?}", player_id, delay);

        Some(self.scheduler.after(
            delay,
            Box::pin(async move {
                if let Some(queue) = me.upgrade() {
                    queue.bot_fallback(&player_id, submitted_at).await;
                }
            }),
        ))
    }

    fn fallback_delay(&self) -> Duration {
        let (low, high) = (self.config.bot_fallback_min, self.config.bot_fallback_max);
        if low == high {
            return low;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(low..=high),
            Err(_) => high,
        }
    }

    /// Pair a still-waiting requester with a bot
    async fn bot_fallback(&self, player_id: &str, submitted_at: DateTime<Utc>) {
        let request = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let Some(index) = state
                .waiting
                .iter()
                .position(|r| r.player_id == player_id && r.submitted_at == submitted_at)
            else {
                return;
            };
            state.fallback_timers.remove(player_id);
            state.pairing.insert(player_id.to_string());
            state.waiting.remove(index)
        };
        self.publish_depth();

        let waited = self.waited_since(request.submitted_at);
        info!(
            "No opponent for {} after {:?}, pairing with a bot",
            request.player_id, waited
        );

        match self.bots.create_opponent(&request.bet).await {
            Ok(bot) => {
                let players = vec![Player::from_request(&request), bot];
                match self.coordinator.open_room(players, request.bet.clone()).await {
                    Ok(snapshot) => {
                        self.record_pairing(OpponentKind::Bot, waited);
                        self.announce(&snapshot).await;
                    }
                    Err(e) => self.report_failure(&[&request], &e).await,
                }
            }
            Err(e) => {
                error!("Could not create a bot for {}: {}", request.player_id, e);
                self.report_failure(&[&request], &e).await;
            }
        }
        self.pairing_done(&[&request.player_id]);
    }

    fn pairing_done(&self, player_ids: &[&PlayerId]) {
        if let Ok(mut state) = self.state.lock() {
            for player_id in player_ids {
                state.pairing.remove(*player_id);
            }
        }
    }

    /// Send the room to every human in it
    async fn announce(&self, snapshot: &RoomSnapshot) {
        for player in snapshot.players.iter().filter(|p| !p.is_bot) {
            self.sessions.bind_multiplayer(&player.id, snapshot.room_id);

            let event = RoomFound {
                player_id: player.id.clone(),
                room: snapshot.clone(),
                timestamp: self.clock.now(),
            };
            if let Err(e) = self.publisher.publish_room_found(event).await {
                warn!(
                    "Failed to publish room {} to {}: {}",
                    snapshot.room_id, player.id, e
                );
            }
        }
    }

    async fn report_failure(&self, requests: &[&MatchRequest], err: &anyhow::Error) {
        self.count(|c| c.pairing_failures += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_matchmaking_failure();
        }

        for request in requests {
            warn!(
                "Pairing failed for {} ({} on {}/{}): {}",
                request.player_id,
                request.bet.amount,
                request.bet.category,
                request.bet.difficulty,
                err
            );
            let event = MatchmakingFailed {
                player_id: request.player_id.clone(),
                bet: request.bet.clone(),
                reason: err.to_string(),
                timestamp: self.clock.now(),
            };
            if let Err(e) = self.publisher.publish_matchmaking_failed(event).await {
                error!(
                    "Failed to notify {} of the failed pairing: {}",
                    request.player_id, e
                );
            }
        }
    }

    fn record_pairing(&self, kind: OpponentKind, waited: Duration) {
        self.waits.record(waited);
        self.count(|c| match kind {
            OpponentKind::Human => c.human_pairings += 1,
            OpponentKind::Bot => c.bot_pairings += 1,
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_pairing(kind.as_str(), waited);
        }
    }

    fn waited_since(&self, submitted_at: DateTime<Utc>) -> Duration {
        (self.clock.now() - submitted_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn publish_depth(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(self.queue_len());
        }
    }

    fn count(&self, update: impl FnOnce(&mut QueueCounters)) {
        if let Ok(mut counters) = self.counters.write() {
            update(&mut counters);
        }
    }
}
