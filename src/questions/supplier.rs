//! Question supplier
//!
//! Serves one question at a time for a category and difficulty, skipping any
//! id in the caller's exclusion set. External sources are consulted in
//! priority order through a TTL cache; the local bank is always the last
//! resort. The supplier never writes history; recording what was served is
//! the caller's job.

use crate::config::QuestionSettings;
use crate::error::{is_no_question_available, MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::questions::cache::{CacheStats, QuestionCache};
use crate::questions::local::LocalQuestionBank;
use crate::questions::opentdb::OpenTdbSource;
use crate::questions::source::{HttpFetcher, HttpSourceConfig, QuestionSource, SourceKind};
use crate::questions::trivia_api::TriviaApiSource;
use crate::questions::validator::validate_question;
use crate::scheduler::Clock;
use crate::types::{Category, Difficulty, Question, QuestionId};
use crate::utils::SharedRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tuning for question lookups
#[derive(Debug, Clone)]
pub struct SupplierConfig {
    /// Questions requested from an external source per fetch
    pub fetch_batch_size: usize,
    /// Upper bound on source lookups for one question, local bank included
    pub max_attempts: u32,
}

impl Default for SupplierConfig {
    fn default() -> Self {
        Self {
            fetch_batch_size: 10,
            max_attempts: 30,
        }
    }
}

/// Request accounting for one source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_response_ms: u64,
    pub questions_served: u64,
    pub invalid_discarded: u64,
}

impl SourceStats {
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.successes as f64 / self.requests as f64
    }

    pub fn average_response_ms(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.total_response_ms as f64 / self.requests as f64
    }
}

pub struct QuestionSupplier {
    sources: Vec<Arc<dyn QuestionSource>>,
    local: Arc<dyn QuestionSource>,
    cache: QuestionCache,
    config: SupplierConfig,
    rng: SharedRng,
    stats: RwLock<HashMap<String, SourceStats>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl QuestionSupplier {
    /// `sources` are external sources in priority order; `local` is consulted last
    pub fn new(
        sources: Vec<Arc<dyn QuestionSource>>,
        local: Arc<dyn QuestionSource>,
        cache: QuestionCache,
        config: SupplierConfig,
        rng: SharedRng,
    ) -> Self {
        Self {
            sources,
            local,
            cache,
            config,
            rng,
            stats: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    /// Build the configured external sources plus the embedded local bank
    pub fn from_settings(
        settings: &QuestionSettings,
        rng: SharedRng,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = HttpFetcher::new(HttpSourceConfig {
            request_timeout: Duration::from_secs(settings.request_timeout_seconds),
            retry_attempts: settings.retry_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        })?;

        let mut sources: Vec<Arc<dyn QuestionSource>> = Vec::new();
        for name in &settings.sources {
            let kind = SourceKind::from_name(name).ok_or_else(|| {
                MatchmakingError::ConfigurationError {
                    message: format!("Unknown question source: {}", name),
                }
            })?;
            let source: Arc<dyn QuestionSource> = match kind {
                SourceKind::OpenTdb => Arc::new(OpenTdbSource::new(http.clone(), rng.clone())),
                SourceKind::TriviaApi => {
                    Arc::new(TriviaApiSource::new(http.clone(), rng.clone()))
                }
            };
            sources.push(source);
        }

        let local = Arc::new(LocalQuestionBank::embedded(rng.clone())?);
        let cache = QuestionCache::new(Duration::from_secs(settings.cache_ttl_seconds), clock);

        info!(
            "Question supplier ready with sources [{}] and local fallback",
            settings.sources.join(", ")
        );

        Ok(Self::new(
            sources,
            local,
            cache,
            SupplierConfig {
                fetch_batch_size: settings.fetch_batch_size,
                max_attempts: settings.max_attempts,
            },
            rng,
        ))
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// One question matching category and difficulty whose id is not in `exclude`
    pub async fn next(
        &self,
        category: Category,
        difficulty: Difficulty,
        exclude: &HashSet<QuestionId>,
    ) -> Result<Question> {
        self.next_skipping(category, difficulty, exclude, &mut HashSet::new())
            .await
    }

    /// Like [`next`](Self::next), but never consults a source named in `spent`.
    /// Sources that fail or come back empty are added to `spent`.
    async fn next_skipping(
        &self,
        category: Category,
        difficulty: Difficulty,
        exclude: &HashSet<QuestionId>,
        spent: &mut HashSet<String>,
    ) -> Result<Question> {
        let remote_budget = self.config.max_attempts.saturating_sub(1);
        let mut attempts = 0u32;
        let mut live: Vec<&Arc<dyn QuestionSource>> = self
            .sources
            .iter()
            .filter(|source| !spent.contains(&source.name()))
            .collect();

        while attempts < remote_budget && !live.is_empty() {
            let mut still_live = Vec::new();

            for source in live {
                if attempts >= remote_budget {
                    break;
                }
                attempts += 1;

                let name = source.name();
                match self.fetch_from(source.as_ref(), &name, category, difficulty).await {
                    Ok((batch, from_cache)) => {
                        if let Some(question) = self.pick_unseen(&batch, exclude) {
                            self.record_served(&name);
                            return Ok(question);
                        }
                        if from_cache {
                            debug!(
                                "Cached {} batch for {}/{} has nothing unseen, invalidating",
                                name, category, difficulty
                            );
                            self.cache.invalidate(&name, category, difficulty);
                            still_live.push(source);
                        } else if !batch.is_empty() {
                            still_live.push(source);
                        } else {
                            spent.insert(name);
                        }
                    }
                    Err(e) => {
                        warn!("Question source {} failed: {}", name, e);
                        spent.insert(name);
                    }
                }
            }

            live = still_live;
        }

        let local_name = self.local.name();
        let started = Instant::now();
        let local_batch = self.local.fetch(category, difficulty, usize::MAX).await;
        self.record_request(&local_name, local_batch.is_ok(), started.elapsed());

        match local_batch {
            Ok(batch) => {
                if let Some(question) = self.pick_unseen(&batch, exclude) {
                    self.record_served(&local_name);
                    return Ok(question);
                }
            }
            Err(e) => warn!("Local question bank failed: {}", e),
        }

        warn!(
            "No unseen question for {}/{} after {} attempts ({} excluded)",
            category,
            difficulty,
            attempts + 1,
            exclude.len()
        );
        Err(MatchmakingError::NoQuestionAvailable {
            category: category.to_string(),
            difficulty: difficulty.to_string(),
        }
        .into())
    }

    /// Up to `count` distinct questions, stopping early once nothing unseen remains
    pub async fn next_batch(
        &self,
        category: Category,
        difficulty: Difficulty,
        count: usize,
        exclude: &HashSet<QuestionId>,
    ) -> Result<Vec<Question>> {
        let mut seen = exclude.clone();
        let mut spent = HashSet::new();
        let mut batch = Vec::with_capacity(count);

        while batch.len() < count {
            match self
                .next_skipping(category, difficulty, &seen, &mut spent)
                .await
            {
                Ok(question) => {
                    seen.insert(question.id.clone());
                    batch.push(question);
                }
                Err(e) if is_no_question_available(&e) => break,
                Err(e) => return Err(e),
            }
        }

        if batch.len() < count {
            info!(
                "Short question batch for {}/{}: {} of {}",
                category,
                difficulty,
                batch.len(),
                count
            );
        }
        Ok(batch)
    }

    /// Per-source request accounting
    pub fn source_stats(&self) -> Vec<SourceStats> {
        let mut stats: Vec<SourceStats> = self
            .stats
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default();
        stats.sort_by(|a, b| a.source.cmp(&b.source));
        stats
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop expired cache entries
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    async fn fetch_from(
        &self,
        source: &dyn QuestionSource,
        name: &str,
        category: Category,
        difficulty: Difficulty,
    ) -> Result<(Vec<Question>, bool)> {
        if let Some(cached) = self.cache.get(name, category, difficulty) {
            return Ok((cached, true));
        }

        let started = Instant::now();
        let result = source
            .fetch(category, difficulty, self.config.fetch_batch_size)
            .await;
        self.record_request(name, result.is_ok(), started.elapsed());

        let fetched = result?;
        let total = fetched.len();
        let valid: Vec<Question> = fetched
            .into_iter()
            .filter(|q| {
                let validation = validate_question(q);
                if !validation.is_valid {
                    debug!("Discarding {} from {}: {:?}", q.id, name, validation.errors);
                }
                validation.is_valid
            })
            .collect();

        let discarded = total - valid.len();
        if discarded > 0 {
            if let Ok(mut stats) = self.stats.write() {
                stats.entry(name.to_string()).or_default().invalid_discarded += discarded as u64;
            }
        }

        if !valid.is_empty() {
            self.cache.put(name, category, difficulty, valid.clone());
        }
        Ok((valid, false))
    }

    fn pick_unseen(&self, batch: &[Question], exclude: &HashSet<QuestionId>) -> Option<Question> {
        let candidates: Vec<&Question> = batch
            .iter()
            .filter(|q| !exclude.contains(&q.id))
            .filter(|q| validate_question(q).is_valid)
            .collect();

        let mut rng = self.rng.lock().ok()?;
        candidates.choose(&mut *rng).map(|q| (*q).clone())
    }

    fn record_request(&self, name: &str, success: bool, elapsed: Duration) {
        if let Ok(mut stats) = self.stats.write() {
            let entry = stats.entry(name.to_string()).or_insert_with(|| SourceStats {
                source: name.to_string(),
                ..Default::default()
            });
            entry.requests += 1;
            if success {
                entry.successes += 1;
            } else {
                entry.failures += 1;
            }
            entry.total_response_ms += elapsed.as_millis() as u64;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_source_request(name, success, elapsed);
        }
    }

    fn record_served(&self, name: &str) {
        if let Ok(mut stats) = self.stats.write() {
            stats
                .entry(name.to_string())
                .or_insert_with(|| SourceStats {
                    source: name.to_string(),
                    ..Default::default()
                })
                .questions_served += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::source::MockQuestionSource;
    use crate::scheduler::SystemClock;
    use crate::utils::shared_rng;

    fn question(id: &str, category: Category, difficulty: Difficulty) -> Question {
        Question {
            id: id.to_string(),
            text: format!("Sample question {}?", id),
            options: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            correct_answer_index: 0,
            category,
            difficulty,
        }
    }

    fn local_bank(ids: &[&str]) -> Arc<dyn QuestionSource> {
        Arc::new(LocalQuestionBank::from_questions(
            ids.iter()
                .map(|id| question(id, Category::Math, Difficulty::Easy))
                .collect(),
            shared_rng(Some(5)),
        ))
    }

    fn supplier(
        sources: Vec<Arc<dyn QuestionSource>>,
        local: Arc<dyn QuestionSource>,
    ) -> QuestionSupplier {
        QuestionSupplier::new(
            sources,
            local,
            QuestionCache::new(Duration::from_secs(600), Arc::new(SystemClock)),
            SupplierConfig::default(),
            shared_rng(Some(9)),
        )
    }

    fn failing_source() -> MockQuestionSource {
        let mut source = MockQuestionSource::new();
        source.expect_name().return_const("broken".to_string());
        source.expect_fetch().times(1).returning(|_, _, _| {
            Err(MatchmakingError::ExternalSourceUnavailable {
                source_name: "broken".to_string(),
                message: "connection refused".to_string(),
            }
            .into())
        });
        source
    }

    #[tokio::test]
    async fn test_failing_source_falls_back_to_local() {
        let supplier = supplier(vec![Arc::new(failing_source())], local_bank(&["l1", "l2"]));

        let question = supplier
            .next(Category::Math, Difficulty::Easy, &HashSet::new())
            .await
            .unwrap();
        assert!(question.id.starts_with('l'));

        let stats = supplier.source_stats();
        let broken = stats.iter().find(|s| s.source == "broken").unwrap();
        assert_eq!(broken.failures, 1);
        let local = stats.iter().find(|s| s.source == "local").unwrap();
        assert_eq!(local.questions_served, 1);
    }

    #[tokio::test]
    async fn test_failing_source_is_tried_once_per_batch() {
        // `failing_source` allows exactly one fetch
        let supplier = supplier(
            vec![Arc::new(failing_source())],
            local_bank(&["l1", "l2", "l3", "l4"]),
        );

        let batch = supplier
            .next_batch(Category::Math, Difficulty::Easy, 4, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(batch.len(), 4);

        let stats = supplier.source_stats();
        let broken = stats.iter().find(|s| s.source == "broken").unwrap();
        assert_eq!(broken.requests, 1);
        let local = stats.iter().find(|s| s.source == "local").unwrap();
        assert_eq!(local.questions_served, 4);
    }

    #[tokio::test]
    async fn test_exclusion_and_exhaustion() {
        let supplier = supplier(Vec::new(), local_bank(&["l1", "l2"]));
        let exclude: HashSet<QuestionId> = ["l1".to_string()].into_iter().collect();

        let question = supplier
            .next(Category::Math, Difficulty::Easy, &exclude)
            .await
            .unwrap();
        assert_eq!(question.id, "l2");

        let exclude: HashSet<QuestionId> =
            ["l1".to_string(), "l2".to_string()].into_iter().collect();
        let err = supplier
            .next(Category::Math, Difficulty::Easy, &exclude)
            .await
            .unwrap_err();
        assert!(is_no_question_available(&err));
    }

    #[tokio::test]
    async fn test_next_batch_stops_early_without_error() {
        let supplier = supplier(Vec::new(), local_bank(&["l1", "l2", "l3"]));
        let batch = supplier
            .next_batch(Category::Math, Difficulty::Easy, 10, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(batch.len(), 3);
        let ids: HashSet<_> = batch.iter().map(|q| q.id.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_remote_batch_is_cached_and_filtered() {
        let mut remote = MockQuestionSource::new();
        remote.expect_name().return_const("remote".to_string());
        remote.expect_fetch().times(1).returning(|category, difficulty, _| {
            let mut malformed = question("bad", category, difficulty);
            malformed.options.truncate(1);
            Ok(vec![
                question("r1", category, difficulty),
                question("r2", category, difficulty),
                malformed,
            ])
        });

        let supplier = supplier(vec![Arc::new(remote)], local_bank(&[]));
        let batch = supplier
            .next_batch(Category::Math, Difficulty::Easy, 2, &HashSet::new())
            .await
            .unwrap();

        let ids: HashSet<_> = batch.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, ["r1", "r2"].into_iter().collect());
        assert_eq!(supplier.cache_stats().hits, 1);

        let remote_stats = supplier
            .source_stats()
            .into_iter()
            .find(|s| s.source == "remote")
            .unwrap();
        assert_eq!(remote_stats.requests, 1);
        assert_eq!(remote_stats.invalid_discarded, 1);
        assert_eq!(remote_stats.questions_served, 2);
    }

    #[tokio::test]
    async fn test_exhausted_cache_is_invalidated_and_refetched() {
        let mut remote = MockQuestionSource::new();
        remote.expect_name().return_const("remote".to_string());
        let mut calls = 0;
        remote.expect_fetch().times(2).returning(move |category, difficulty, _| {
            calls += 1;
            if calls == 1 {
                Ok(vec![question("r1", category, difficulty)])
            } else {
                Ok(vec![question("r2", category, difficulty)])
            }
        });

        let supplier = supplier(vec![Arc::new(remote)], local_bank(&[]));
        let first = supplier
            .next(Category::Math, Difficulty::Easy, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(first.id, "r1");

        let exclude: HashSet<QuestionId> = ["r1".to_string()].into_iter().collect();
        let second = supplier
            .next(Category::Math, Difficulty::Easy, &exclude)
            .await
            .unwrap();
        assert_eq!(second.id, "r2");
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let mut remote = MockQuestionSource::new();
        remote.expect_name().return_const("stale".to_string());
        // Always the same, already-seen question: 29 remote lookups, then local
        remote
            .expect_fetch()
            .returning(|category, difficulty, _| Ok(vec![question("seen", category, difficulty)]));

        let supplier = supplier(vec![Arc::new(remote)], local_bank(&[]));
        let exclude: HashSet<QuestionId> = ["seen".to_string()].into_iter().collect();
        let err = supplier
            .next(Category::Math, Difficulty::Easy, &exclude)
            .await
            .unwrap_err();
        assert!(is_no_question_available(&err));

        let stale = supplier
            .source_stats()
            .into_iter()
            .find(|s| s.source == "stale")
            .unwrap();
        assert!(stale.requests <= 29);
        assert!(stale.requests >= 1);
    }
}
