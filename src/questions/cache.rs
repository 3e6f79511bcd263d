//! TTL cache of fetched question batches

use crate::scheduler::Clock;
use crate::types::{Category, Difficulty, Question};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

type CacheKey = (String, Category, Difficulty);

#[derive(Debug, Clone)]
struct CacheEntry {
    questions: Vec<Question>,
    stored_at: DateTime<Utc>,
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Batches keyed by source, category and difficulty, expiring after a fixed TTL
pub struct QuestionCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    stats: RwLock<CacheStats>,
}

impl QuestionCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Cached batch for the key, if present and not expired
    pub fn get(
        &self,
        source: &str,
        category: Category,
        difficulty: Difficulty,
    ) -> Option<Vec<Question>> {
        let key = (source.to_string(), category, difficulty);
        let now = self.clock.now();

        let found = self.entries.read().ok().and_then(|entries| {
            entries
                .get(&key)
                .filter(|entry| !self.is_expired(entry, now))
                .map(|entry| entry.questions.clone())
        });

        if let Ok(mut stats) = self.stats.write() {
            if found.is_some() {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }

        found
    }

    pub fn put(
        &self,
        source: &str,
        category: Category,
        difficulty: Difficulty,
        questions: Vec<Question>,
    ) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                (source.to_string(), category, difficulty),
                CacheEntry {
                    questions,
                    stored_at: self.clock.now(),
                },
            );
        }
    }

    /// Drop the entry so the next lookup goes back to the source
    pub fn invalidate(&self, source: &str, category: Category, difficulty: Difficulty) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&(source.to_string(), category, difficulty));
        }
    }

    /// Remove expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        match self.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| !self.is_expired(entry, now));
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entries = self.entries.read().map(|e| e.len()).unwrap_or(0);
        stats
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match (now - entry.stored_at).to_std() {
            Ok(age) => age >= self.ttl,
            // Stored in the future relative to the clock
            Err(_) => false,
        }
    }
}
