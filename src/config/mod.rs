//! Configuration management for the trivia-duel service
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values for the matchmaking engine.

pub mod app;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, BotSettings, MatchmakingSettings,
    QuestionSettings, RoomSettings, ServiceSettings,
};
