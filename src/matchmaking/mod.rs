//! Matchmaking
//!
//! The [`MatchmakingQueue`] pairs compatible bets or falls back to a bot, and
//! [`wait_stats`] turns observed waits into the queue's wait estimate.

pub mod queue;
pub mod wait_stats;

pub use queue::{EnqueueOutcome, MatchmakingQueue, QueueConfig, QueueCounters};
pub use wait_stats::{OpponentKind, WaitEstimator, WaitTimeStats};
