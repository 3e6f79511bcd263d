//! Utility functions for the trivia duel engine

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Random source shared by components that make randomized decisions
pub type SharedRng = Arc<Mutex<StdRng>>;

/// Build a shared RNG, seeded for reproducible runs or from entropy otherwise
pub fn shared_rng(seed: Option<u64>) -> SharedRng {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Arc::new(Mutex::new(rng))
}

/// Generate a new unique room ID
pub fn generate_room_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate an identifier for a synthesized bot opponent
pub fn generate_bot_id() -> String {
    format!("bot_{}", Uuid::new_v4().simple())
}

/// Derive a question id that stays the same every time a source returns the same text
pub fn stable_question_id(source: &str, text: &str) -> String {
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes());
    format!("{}_{}", source, Uuid::new_v5(&namespace, text.as_bytes()).simple())
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_room_id();
        let id2 = generate_room_id();
        assert_ne!(id1, id2);

        let bot1 = generate_bot_id();
        let bot2 = generate_bot_id();
        assert!(bot1.starts_with("bot_"));
        assert_ne!(bot1, bot2);
    }

    #[test]
    fn test_stable_question_id() {
        let a = stable_question_id("opentdb", "What is 2 + 2?");
        let b = stable_question_id("opentdb", "What is 2 + 2?");
        let c = stable_question_id("opentdb", "What is 3 + 3?");
        let d = stable_question_id("the-trivia-api", "What is 2 + 2?");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.starts_with("opentdb_"));
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let a = shared_rng(Some(7));
        let b = shared_rng(Some(7));
        let x: u64 = a.lock().unwrap().gen();
        let y: u64 = b.lock().unwrap().gen();
        assert_eq!(x, y);
    }
}
