//! Bot opponents
//!
//! A lone requester whose wait window runs out is paired with a synthesized
//! bot. [`provider`] creates the bot; [`simulator`] answers on its behalf.

pub mod provider;
pub mod simulator;

// Re-export commonly used types
pub use provider::{BotProvider, NamedBotProvider};
pub use simulator::{AnswerSink, BotAnswerSimulator, BotTurn};
