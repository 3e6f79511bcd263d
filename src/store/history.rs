//! Per-player question history
//!
//! Rooms read both players' histories when sourcing questions and write the
//! served ids back for human players once a match ends.

use crate::error::{MatchmakingError, Result};
use crate::types::{PlayerId, QuestionId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Storage of the question ids each player has already been served
#[async_trait]
pub trait QuestionHistoryStore: Send + Sync {
    /// Every question id the player has been served
    async fn answered_question_ids(&self, player_id: &str) -> Result<HashSet<QuestionId>>;

    /// Append ids to the player's history
    async fn record_answered_questions(&self, player_id: &str, ids: &[QuestionId]) -> Result<()>;
}

/// In-memory question history
#[derive(Debug, Default)]
pub struct InMemoryQuestionHistory {
    entries: RwLock<HashMap<PlayerId, HashSet<QuestionId>>>,
}

impl InMemoryQuestionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a player's history
    pub fn preset(&self, player_id: &str, ids: impl IntoIterator<Item = QuestionId>) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| MatchmakingError::lock_failed("question history write"))?;
        entries
            .entry(player_id.to_string())
            .or_default()
            .extend(ids);
        Ok(())
    }

    /// Number of players with recorded history
    pub fn player_count(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl QuestionHistoryStore for InMemoryQuestionHistory {
    async fn answered_question_ids(&self, player_id: &str) -> Result<HashSet<QuestionId>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| MatchmakingError::lock_failed("question history read"))?;

        Ok(entries.get(player_id).cloned().unwrap_or_default())
    }

    async fn record_answered_questions(&self, player_id: &str, ids: &[QuestionId]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| MatchmakingError::lock_failed("question history write"))?;

        entries
            .entry(player_id.to_string())
            .or_default()
            .extend(ids.iter().cloned());
        Ok(())
    }
}
