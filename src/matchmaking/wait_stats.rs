//! Pairing wait statistics and the queue's wait estimate

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;

/// Running mean over observed pairing waits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitTimeStats {
    pub sample_count: u64,
    pub sum_seconds: f64,
}

impl WaitTimeStats {
    pub fn add_sample(&mut self, wait: Duration) {
        self.sample_count += 1;
        self.sum_seconds += wait.as_secs_f64();
    }

    pub fn mean(&self) -> Duration {
        if self.sample_count == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sum_seconds / self.sample_count as f64)
    }
}

/// How a waiting requester ended up paired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpponentKind {
    Human,
    Bot,
}

impl OpponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpponentKind::Human => "human",
            OpponentKind::Bot => "bot",
        }
    }
}

/// Wait estimate derived from observed waits, clamped to the bot-fallback window.
/// With no observations yet the estimate is the middle of the window.
pub struct WaitEstimator {
    window: (Duration, Duration),
    stats: RwLock<WaitTimeStats>,
}

impl WaitEstimator {
    pub fn new(min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            window: (min_wait, max_wait.max(min_wait)),
            stats: RwLock::new(WaitTimeStats::default()),
        }
    }

    /// Waits before a human and before a bot opponent both count
    pub fn record(&self, wait: Duration) {
        if let Ok(mut stats) = self.stats.write() {
            stats.add_sample(wait);
        }
    }

    pub fn estimate(&self) -> Duration {
        let (low, high) = self.window;
        let stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        if stats.sample_count == 0 {
            return (low + high) / 2;
        }
        stats.mean().clamp(low, high)
    }
}
