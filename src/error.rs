//! Error types for the trivia duel engine
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking and match-lifecycle scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid match request: {reason}")]
    InvalidMatchRequest { reason: String },

    #[error("No question available for {category}/{difficulty}")]
    NoQuestionAvailable { category: String, difficulty: String },

    #[error("Question source '{source_name}' unavailable: {message}")]
    ExternalSourceUnavailable {
        source_name: String,
        message: String,
    },

    #[error("Invalid answer submission: {reason}")]
    InvalidAnswerSubmission { reason: String },

    #[error("Room not found: {room_id}")]
    RoomNotFound { room_id: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Shorthand for the poisoned-lock case that every shared map has to handle
    pub fn lock_failed(what: &str) -> Self {
        MatchmakingError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

/// Returns true when the error chain carries `NoQuestionAvailable`
pub fn is_no_question_available(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::NoQuestionAvailable { .. })
    )
}
