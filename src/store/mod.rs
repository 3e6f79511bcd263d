//! Persistence ports and their in-memory implementations

pub mod history;
pub mod ledger;

pub use history::{InMemoryQuestionHistory, QuestionHistoryStore};
pub use ledger::{InMemoryMatchLedger, MatchLedger, MatchRecord};
