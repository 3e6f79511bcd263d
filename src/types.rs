//! Common types used throughout the trivia duel engine

use crate::error::{MatchmakingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for players and bots
pub type PlayerId = String;

/// Unique identifier for live rooms
pub type RoomId = Uuid;

/// Identifier assigned by the match ledger
pub type MatchId = Uuid;

/// Stable identifier of a question across a player's history
pub type QuestionId = String;

/// Smallest wager increment accepted by default
pub const DEFAULT_BET_UNIT: u64 = 5;

/// Question category a wager is placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Current,
    Math,
    English,
    Culture,
    Sports,
    General,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Current,
        Category::Math,
        Category::English,
        Category::Culture,
        Category::Sports,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Current => "current",
            Category::Math => "math",
            Category::English => "english",
            Category::Culture => "culture",
            Category::Sports => "sports",
            Category::General => "general",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| MatchmakingError::InvalidMatchRequest {
                reason: format!("Unknown category: {}", s),
            })
    }
}

/// Difficulty tier, which also fixes the payout multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Multiplier applied to the wagered amount on a win
    pub fn payout_multiplier(&self) -> f64 {
        match self {
            Difficulty::Easy => 1.5,
            Difficulty::Medium => 2.0,
            Difficulty::Hard => 3.0,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Difficulty::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| MatchmakingError::InvalidMatchRequest {
                reason: format!("Unknown difficulty: {}", s),
            })
    }
}

/// A wager: amount, category and difficulty define compatibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub amount: u64,
    pub category: Category,
    pub difficulty: Difficulty,
    pub payout_multiplier: f64,
}

impl Bet {
    /// Create a bet, deriving the payout multiplier from the difficulty
    pub fn new(amount: u64, category: Category, difficulty: Difficulty) -> Self {
        Self {
            amount,
            category,
            difficulty,
            payout_multiplier: difficulty.payout_multiplier(),
        }
    }

    /// Two bets can be paired iff amount, category and difficulty all match
    pub fn is_compatible_with(&self, other: &Bet) -> bool {
        self.amount == other.amount
            && self.category == other.category
            && self.difficulty == other.difficulty
    }

    /// Amount paid out to the winner
    pub fn potential_payout(&self) -> f64 {
        self.amount as f64 * self.payout_multiplier
    }

    /// Check the amount is a positive multiple of `unit`
    pub fn validate(&self, unit: u64) -> Result<()> {
        if self.amount == 0 {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "Bet amount must be positive".to_string(),
            }
            .into());
        }
        if unit > 0 && self.amount % unit != 0 {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: format!("Bet amount {} is not a multiple of {}", self.amount, unit),
            }
            .into());
        }
        Ok(())
    }
}

/// Request to be paired for a wagered match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub player_id: PlayerId,
    pub display_name: String,
    pub bet: Bet,
    pub submitted_at: DateTime<Utc>,
}

/// A multiple-choice question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
    pub category: Category,
    pub difficulty: Difficulty,
}

impl Question {
    pub fn is_correct(&self, answer_index: usize) -> bool {
        answer_index == self.correct_answer_index
    }

    /// The question as shown to players, without the answer key
    pub fn to_public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id.clone(),
            text: self.text.clone(),
            options: self.options.clone(),
            category: self.category,
            difficulty: self.difficulty,
        }
    }
}

/// Question view safe to hand to clients mid-round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: QuestionId,
    pub text: String,
    pub options: Vec<String>,
    pub category: Category,
    pub difficulty: Difficulty,
}

/// A participant bound to a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub score: u32,
    pub has_answered: bool,
    pub current_answer_index: Option<usize>,
    pub is_bot: bool,
}

impl Player {
    pub fn human(id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            score: 0,
            has_answered: false,
            current_answer_index: None,
            is_bot: false,
        }
    }

    pub fn bot(id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            is_bot: true,
            ..Self::human(id, display_name)
        }
    }

    pub fn from_request(request: &MatchRequest) -> Self {
        Self::human(request.player_id.clone(), request.display_name.clone())
    }
}

/// Room lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    Tiebreaker,
    Finished,
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomStatus::Active => write!(f, "active"),
            RoomStatus::Tiebreaker => write!(f, "tiebreaker"),
            RoomStatus::Finished => write!(f, "finished"),
        }
    }
}

/// Terminal result of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MatchOutcome {
    Winner { player_id: PlayerId },
    Draw,
}

impl MatchOutcome {
    pub fn winner_id(&self) -> Option<&str> {
        match self {
            MatchOutcome::Winner { player_id } => Some(player_id.as_str()),
            MatchOutcome::Draw => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchOutcome::Winner { .. } => "winner",
            MatchOutcome::Draw => "draw",
        }
    }
}

/// Read-only view of a room at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub match_id: MatchId,
    pub players: Vec<Player>,
    pub bet: Bet,
    pub status: RoomStatus,
    pub current_question: Option<PublicQuestion>,
    pub current_question_index: usize,
    pub total_questions: usize,
    pub tiebreaker_round: u32,
    pub outcome: Option<MatchOutcome>,
    pub question_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RoomSnapshot {
    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn opponent_of(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id != player_id)
    }
}

/// Queue depth and wait estimate for UI feedback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub players_in_queue: usize,
    pub estimated_wait_seconds: u64,
}

/// Event sent to each human requester when their room is ready
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomFound {
    pub player_id: PlayerId,
    pub room: RoomSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted after every settled question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSettled {
    pub settled_question_index: usize,
    pub room: RoomSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted once a room reaches its terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFinished {
    pub room_id: RoomId,
    pub match_id: MatchId,
    pub outcome: MatchOutcome,
    pub players: Vec<Player>,
    pub bet: Bet,
    pub total_questions: usize,
    pub tiebreaker_rounds: u32,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a pairing could not be turned into a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingFailed {
    pub player_id: PlayerId,
    pub bet: Bet,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DuelEvent {
    RoomFound(RoomFound),
    RoundSettled(RoundSettled),
    MatchFinished(MatchFinished),
    MatchmakingFailed(MatchmakingFailed),
}

/// Inbound commands accepted over AMQP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MatchCommand {
    Enqueue {
        player_id: PlayerId,
        display_name: String,
        amount: u64,
        category: Category,
        difficulty: Difficulty,
    },
    Cancel {
        player_id: PlayerId,
    },
    SubmitAnswer {
        room_id: RoomId,
        player_id: PlayerId,
        answer_index: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bet_compatibility() {
        let a = Bet::new(10, Category::Math, Difficulty::Easy);
        let b = Bet::new(10, Category::Math, Difficulty::Easy);
        let c = Bet::new(10, Category::Math, Difficulty::Hard);
        let d = Bet::new(25, Category::Math, Difficulty::Easy);

        assert!(a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&c));
        assert!(!a.is_compatible_with(&d));
    }

    #[test]
    fn test_bet_payout() {
        assert_eq!(
            Bet::new(10, Category::Sports, Difficulty::Easy).potential_payout(),
            15.0
        );
        assert_eq!(
            Bet::new(10, Category::Sports, Difficulty::Medium).potential_payout(),
            20.0
        );
        assert_eq!(
            Bet::new(10, Category::Sports, Difficulty::Hard).potential_payout(),
            30.0
        );
    }

    #[test]
    fn test_bet_validation() {
        assert!(Bet::new(10, Category::Math, Difficulty::Easy)
            .validate(DEFAULT_BET_UNIT)
            .is_ok());
        assert!(Bet::new(0, Category::Math, Difficulty::Easy)
            .validate(DEFAULT_BET_UNIT)
            .is_err());
        assert!(Bet::new(12, Category::Math, Difficulty::Easy)
            .validate(DEFAULT_BET_UNIT)
            .is_err());
    }

    #[test]
    fn test_category_and_difficulty_parsing() {
        assert_eq!("math".parse::<Category>().unwrap(), Category::Math);
        assert_eq!("SPORTS".parse::<Category>().unwrap(), Category::Sports);
        assert!("history".parse::<Category>().is_err());
        assert_eq!("hard".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert!("expert".parse::<Difficulty>().is_err());
    }

    #[test]
    fn test_command_wire_format() {
        let json = r#"{"type":"Enqueue","player_id":"p1","display_name":"Ana","amount":10,"category":"math","difficulty":"easy"}"#;
        let command: MatchCommand = serde_json::from_str(json).unwrap();
        match command {
            MatchCommand::Enqueue {
                player_id,
                category,
                difficulty,
                ..
            } => {
                assert_eq!(player_id, "p1");
                assert_eq!(category, Category::Math);
                assert_eq!(difficulty, Difficulty::Easy);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_outcome_serialization() {
        let draw = serde_json::to_value(MatchOutcome::Draw).unwrap();
        assert_eq!(draw["kind"], "draw");

        let win = serde_json::to_value(MatchOutcome::Winner {
            player_id: "p1".to_string(),
        })
        .unwrap();
        assert_eq!(win["kind"], "winner");
        assert_eq!(win["player_id"], "p1");
    }
}
