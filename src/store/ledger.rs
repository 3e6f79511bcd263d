//! Match ledger
//!
//! Records that a wagered match exists and how it ended. Pot settlement is
//! handled downstream from the recorded outcome.

use crate::error::{MatchmakingError, Result};
use crate::types::{Bet, MatchId, MatchOutcome, Player, PlayerId};
use crate::utils::{current_timestamp, generate_match_id};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Ledger entry for one match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub players: Vec<PlayerId>,
    pub bot_opponent: bool,
    pub bet: Bet,
    pub created_at: DateTime<Utc>,
    pub outcome: Option<MatchOutcome>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait MatchLedger: Send + Sync {
    /// Register a new match and return its id
    async fn record_match_created(&self, players: &[Player], bet: &Bet) -> Result<MatchId>;

    /// Store the terminal outcome of a match
    async fn record_match_result(&self, match_id: MatchId, outcome: &MatchOutcome) -> Result<()>;
}

/// In-memory match ledger
#[derive(Debug, Default)]
pub struct InMemoryMatchLedger {
    records: RwLock<HashMap<MatchId, MatchRecord>>,
}

impl InMemoryMatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, match_id: MatchId) -> Option<MatchRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(&match_id).cloned())
    }

    pub fn all(&self) -> Vec<MatchRecord> {
        self.records
            .read()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MatchLedger for InMemoryMatchLedger {
    async fn record_match_created(&self, players: &[Player], bet: &Bet) -> Result<MatchId> {
        let record = MatchRecord {
            match_id: generate_match_id(),
            players: players.iter().map(|p| p.id.clone()).collect(),
            bot_opponent: players.iter().any(|p| p.is_bot),
            bet: bet.clone(),
            created_at: current_timestamp(),
            outcome: None,
            finished_at: None,
        };
        let match_id = record.match_id;

        let mut records = self
            .records
            .write()
            .map_err(|_| MatchmakingError::lock_failed("match ledger write"))?;
        records.insert(match_id, record);

        Ok(match_id)
    }

    async fn record_match_result(&self, match_id: MatchId, outcome: &MatchOutcome) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| MatchmakingError::lock_failed("match ledger write"))?;

        let record = records
            .get_mut(&match_id)
            .ok_or_else(|| MatchmakingError::InternalError {
                message: format!("Unknown match {}", match_id),
            })?;
        record.outcome = Some(outcome.clone());
        record.finished_at = Some(current_timestamp());
        Ok(())
    }
}
