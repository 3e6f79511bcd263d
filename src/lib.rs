//! Trivia Duel - matchmaking and match-lifecycle engine for head-to-head trivia wagers
//!
//! Players stake an amount on a category and difficulty, get paired with a
//! compatible opponent (or a bot after a short wait), and play a ten-question
//! match with sudden-death tiebreakers. Commands arrive over AMQP and room
//! events are published back to the broker.

pub mod amqp;
pub mod bot;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod questions;
pub mod room;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use matchmaking::{EnqueueOutcome, MatchmakingQueue};
pub use questions::QuestionSupplier;
pub use room::{MatchRegistry, MatchRoom, RoomCoordinator};
pub use service::MatchService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
