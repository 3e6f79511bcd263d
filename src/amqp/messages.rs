//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;

/// Default queue carrying inbound match commands
pub const COMMAND_QUEUE: &str = "trivia_duel.commands";
/// Default topic exchange for outbound room events
pub const EVENTS_EXCHANGE: &str = "trivia_duel.events";

/// Routing keys for events
pub const ROOM_FOUND_ROUTING_KEY: &str = "room.found";
pub const ROUND_SETTLED_ROUTING_KEY: &str = "room.round_settled";
pub const MATCH_FINISHED_ROUTING_KEY: &str = "room.finished";
pub const MATCHMAKING_FAILED_ROUTING_KEY: &str = "matchmaking.failed";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key: routing_key.into(),
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidMatchRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Command serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    pub fn serialize_command(command: &MatchCommand) -> Result<Vec<u8>> {
        Self::validate_command(command)?;
        serde_json::to_vec(command).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize command: {}", e),
            }
            .into()
        })
    }

    /// Decode a command, accepting either a bare command or one wrapped in an envelope
    pub fn deserialize_command(bytes: &[u8]) -> Result<MatchCommand> {
        let command = match serde_json::from_slice::<MatchCommand>(bytes) {
            Ok(command) => command,
            Err(bare_err) => MessageEnvelope::<MatchCommand>::from_bytes(bytes)
                .map(|envelope| envelope.payload)
                .map_err(|_| MatchmakingError::InvalidMatchRequest {
                    reason: format!("Failed to deserialize command: {}", bare_err),
                })?,
        };

        Self::validate_command(&command)?;
        Ok(command)
    }

    pub fn validate_command(command: &MatchCommand) -> Result<()> {
        let player_id = match command {
            MatchCommand::Enqueue { player_id, .. } => player_id,
            MatchCommand::Cancel { player_id } => player_id,
            MatchCommand::SubmitAnswer { player_id, .. } => player_id,
        };

        if player_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "Player ID cannot be empty".to_string(),
            }
            .into());
        }

        if let MatchCommand::Enqueue { amount, .. } = command {
            if *amount == 0 {
                return Err(MatchmakingError::InvalidMatchRequest {
                    reason: "Bet amount must be positive".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    pub fn routing_key(event: &DuelEvent) -> &'static str {
        match event {
            DuelEvent::RoomFound(_) => ROOM_FOUND_ROUTING_KEY,
            DuelEvent::RoundSettled(_) => ROUND_SETTLED_ROUTING_KEY,
            DuelEvent::MatchFinished(_) => MATCH_FINISHED_ROUTING_KEY,
            DuelEvent::MatchmakingFailed(_) => MATCHMAKING_FAILED_ROUTING_KEY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueue_command() -> MatchCommand {
        MatchCommand::Enqueue {
            player_id: "p1".to_string(),
            display_name: "Ana".to_string(),
            amount: 10,
            category: Category::Math,
            difficulty: Difficulty::Easy,
        }
    }

    #[test]
    fn test_message_envelope_creation() {
        let envelope = MessageEnvelope::new(enqueue_command(), ROOM_FOUND_ROUTING_KEY);
        assert_eq!(envelope.routing_key, "room.found");
        assert!(!envelope.correlation_id.is_empty());
    }

    #[test]
    fn test_command_validation() {
        assert!(MessageUtils::validate_command(&enqueue_command()).is_ok());
        assert!(MessageUtils::validate_command(&MatchCommand::Cancel {
            player_id: " ".to_string()
        })
        .is_err());
        assert!(MessageUtils::validate_command(&MatchCommand::Enqueue {
            player_id: "p1".to_string(),
            display_name: "Ana".to_string(),
            amount: 0,
            category: Category::Math,
            difficulty: Difficulty::Easy,
        })
        .is_err());
    }

    #[test]
    fn test_bare_and_enveloped_commands_decode() {
        let bare = MessageUtils::serialize_command(&enqueue_command()).unwrap();
        assert!(matches!(
            MessageUtils::deserialize_command(&bare).unwrap(),
            MatchCommand::Enqueue { amount: 10, .. }
        ));

        let wrapped = MessageEnvelope::new(
            MatchCommand::Cancel {
                player_id: "p2".to_string(),
            },
            "command",
        )
        .to_bytes()
        .unwrap();
        assert!(matches!(
            MessageUtils::deserialize_command(&wrapped).unwrap(),
            MatchCommand::Cancel { player_id } if player_id == "p2"
        ));

        assert!(MessageUtils::deserialize_command(b"{\"type\":\"Launch\"}").is_err());
    }
}
