//! Bot opponent provider
//!
//! Synthesizes the opponent a lone requester is paired with once their wait
//! window runs out. Bots carry human-sounding display names so the pairing
//! reads like any other match.

use crate::error::{MatchmakingError, Result};
use crate::types::{Bet, Player};
use crate::utils::{generate_bot_id, SharedRng};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const NAME_PREFIXES: [&str; 8] = [
    "Mestre", "Pro", "Expert", "Ninja", "Ace", "Elite", "Super", "Mega",
];

const NAME_SUFFIXES: [&str; 8] = [
    "Quiz", "Brain", "Mind", "Genius", "Master", "Player", "Gamer", "Star",
];

/// Source of bot opponents
#[async_trait]
pub trait BotProvider: Send + Sync {
    /// Create a bot to play against a requester holding `bet`
    async fn create_opponent(&self, bet: &Bet) -> Result<Player>;

    /// Number of bots created so far
    fn bots_created(&self) -> u64;
}

/// Generates bots named `<prefix><suffix><1-999>`, e.g. `NinjaBrain417`
pub struct NamedBotProvider {
    rng: SharedRng,
    created: AtomicU64,
}

impl NamedBotProvider {
    pub fn new(rng: SharedRng) -> Self {
        Self {
            rng,
            created: AtomicU64::new(0),
        }
    }

    /// A random human-sounding display name
    pub fn generate_name(&self) -> Result<String> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| MatchmakingError::lock_failed("bot rng"))?;

        let prefix = NAME_PREFIXES.choose(&mut *rng).copied().unwrap_or("Pro");
        let suffix = NAME_SUFFIXES.choose(&mut *rng).copied().unwrap_or("Quiz");
        let number: u32 = rng.gen_range(1..=999);
        Ok(format!("{}{}{}", prefix, suffix, number))
    }
}

#[async_trait]
impl BotProvider for NamedBotProvider {
    async fn create_opponent(&self, bet: &Bet) -> Result<Player> {
        let bot = Player::bot(generate_bot_id(), self.generate_name()?);
        self.created.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Synthesized bot {} ({}) for a {} bet on {}/{}",
            bot.display_name, bot.id, bet.amount, bet.category, bet.difficulty
        );
        Ok(bot)
    }

    fn bots_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}
