//! Registry of live match rooms
//!
//! Rooms are stored by id, each behind its own async mutex so independent
//! matches never contend with each other. Creation sources the opening batch
//! of questions and records the match in the ledger.

use crate::error::{MatchmakingError, Result};
use crate::questions::QuestionSupplier;
use crate::room::instance::{MatchRoom, RoomConfig};
use crate::scheduler::Clock;
use crate::store::{MatchLedger, QuestionHistoryStore};
use crate::types::{Bet, MatchOutcome, Player, QuestionId, RoomId, RoomSnapshot};
use crate::utils::{generate_match_id, generate_room_id};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// A room shared between the registry, timers and submission paths
pub type SharedRoom = Arc<Mutex<MatchRoom>>;

/// Room counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub rooms_created: u64,
    pub creation_failures: u64,
    pub active_rooms: usize,
    pub finished_rooms: usize,
    pub matches_finished: u64,
    pub draws: u64,
    pub tiebreaker_rounds: u64,
    pub rooms_evicted: u64,
}

pub struct MatchRegistry {
    rooms: Arc<RwLock<HashMap<RoomId, SharedRoom>>>,
    supplier: Arc<QuestionSupplier>,
    history: Arc<dyn QuestionHistoryStore>,
    ledger: Arc<dyn MatchLedger>,
    clock: Arc<dyn Clock>,
    config: RoomConfig,
    stats: Arc<RwLock<RegistryStats>>,
}

impl MatchRegistry {
    pub fn new(
        supplier: Arc<QuestionSupplier>,
        history: Arc<dyn QuestionHistoryStore>,
        ledger: Arc<dyn MatchLedger>,
        clock: Arc<dyn Clock>,
        config: RoomConfig,
    ) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            supplier,
            history,
            ledger,
            clock,
            config,
            stats: Arc::new(RwLock::new(RegistryStats::default())),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn supplier(&self) -> &Arc<QuestionSupplier> {
        &self.supplier
    }

    /// Create and register a room for two players.
    ///
    /// Fails with `NoQuestionAvailable` when not a single unseen question can
    /// be sourced for the bet's category and difficulty.
    pub async fn create(&self, players: Vec<Player>, bet: Bet) -> Result<RoomSnapshot> {
        let mut excluded: HashSet<QuestionId> = HashSet::new();
        for player in &players {
            match self.history.answered_question_ids(&player.id).await {
                Ok(ids) => excluded.extend(ids),
                Err(e) => warn!(
                    "Could not read question history for {}, continuing without it: {}",
                    player.id, e
                ),
            }
        }

        let questions = match self
            .supplier
            .next_batch(
                bet.category,
                bet.difficulty,
                self.config.main_round_questions,
                &excluded,
            )
            .await
        {
            Ok(questions) if !questions.is_empty() => questions,
            Ok(_) => {
                self.bump(|s| s.creation_failures += 1);
                return Err(MatchmakingError::NoQuestionAvailable {
                    category: bet.category.to_string(),
                    difficulty: bet.difficulty.to_string(),
                }
                .into());
            }
            Err(e) => {
                self.bump(|s| s.creation_failures += 1);
                return Err(e);
            }
        };

        let match_id = match self.ledger.record_match_created(&players, &bet).await {
            Ok(match_id) => match_id,
            Err(e) => {
                let fallback = generate_match_id();
                error!(
                    "Ledger rejected new match, continuing with unrecorded id {}: {}",
                    fallback, e
                );
                fallback
            }
        };

        let room = MatchRoom::new(
            generate_room_id(),
            match_id,
            players,
            bet,
            questions,
            excluded,
            self.config.clone(),
            self.clock.now(),
        )?;
        let snapshot = room.snapshot();

        {
            let mut rooms = self
                .rooms
                .write()
                .map_err(|_| MatchmakingError::lock_failed("rooms write"))?;
            rooms.insert(snapshot.room_id, Arc::new(Mutex::new(room)));
        }
        self.bump(|s| s.rooms_created += 1);

        info!(
            "Created room {} (match {}) for {} with {} questions, bet {} on {}/{}",
            snapshot.room_id,
            snapshot.match_id,
            snapshot
                .players
                .iter()
                .map(|p| p.id.as_str())
                .collect::<Vec<_>>()
                .join(" vs "),
            snapshot.total_questions,
            snapshot.bet.amount,
            snapshot.bet.category,
            snapshot.bet.difficulty
        );

        Ok(snapshot)
    }

    pub fn get(&self, room_id: RoomId) -> Option<SharedRoom> {
        self.rooms
            .read()
            .ok()
            .and_then(|rooms| rooms.get(&room_id).cloned())
    }

    pub async fn snapshot(&self, room_id: RoomId) -> Option<RoomSnapshot> {
        let room = self.get(room_id)?;
        let guard = room.lock().await;
        Some(guard.snapshot())
    }

    pub fn remove(&self, room_id: RoomId) -> Option<SharedRoom> {
        self.rooms
            .write()
            .ok()
            .and_then(|mut rooms| rooms.remove(&room_id))
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms
            .read()
            .map(|rooms| rooms.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().map(|rooms| rooms.len()).unwrap_or(0)
    }

    /// Count a terminal outcome
    pub fn record_finished(&self, outcome: &MatchOutcome) {
        self.bump(|s| {
            s.matches_finished += 1;
            if *outcome == MatchOutcome::Draw {
                s.draws += 1;
            }
        });
    }

    pub fn record_tiebreaker(&self) {
        self.bump(|s| s.tiebreaker_rounds += 1);
    }

    /// Evict rooms that finished at least `retention` ago
    pub async fn cleanup_finished(&self, retention: Duration) -> usize {
        let now = self.clock.now();
        let retention =
            chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());

        let rooms: Vec<(RoomId, SharedRoom)> = match self.rooms.read() {
            Ok(rooms) => rooms.iter().map(|(id, r)| (*id, r.clone())).collect(),
            Err(_) => return 0,
        };

        let mut expired = Vec::new();
        for (room_id, room) in rooms {
            let guard = room.lock().await;
            if let Some(finished_at) = guard.finished_at() {
                if finished_at + retention <= now {
                    expired.push(room_id);
                }
            }
        }

        let removed = match self.rooms.write() {
            Ok(mut rooms) => expired
                .iter()
                .filter(|id| rooms.remove(id).is_some())
                .count(),
            Err(_) => 0,
        };

        if removed > 0 {
            self.bump(|s| s.rooms_evicted += removed as u64);
            info!("Evicted {} finished rooms", removed);
        }
        removed
    }

    pub async fn stats(&self) -> RegistryStats {
        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();

        let rooms: Vec<SharedRoom> = self
            .rooms
            .read()
            .map(|rooms| rooms.values().cloned().collect())
            .unwrap_or_default();

        stats.active_rooms = 0;
        stats.finished_rooms = 0;
        for room in rooms {
            if room.lock().await.is_finished() {
                stats.finished_rooms += 1;
            } else {
                stats.active_rooms += 1;
            }
        }
        stats
    }

    fn bump(&self, update: impl FnOnce(&mut RegistryStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}
